use serde_json::Value as JsonValue;

use crate::error::LLMError;
use crate::types::{FinishReason, GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::types::{
    ResponsesContentPart, ResponsesOutputItem, ResponsesResponse, ResponsesSummaryPart,
    ResponsesUsage,
};

/// Rebuilds the authoritative snapshot from a full response object.
pub(crate) fn map_response(resp: &ResponsesResponse) -> GenerationResponse {
    let mut out = GenerationResponse::default();
    let mut saw_refusal = false;

    for item in &resp.output {
        match item {
            ResponsesOutputItem::Message { content } => {
                for part in content {
                    match part {
                        ResponsesContentPart::OutputText { text } => {
                            if !text.is_empty() {
                                out.texts
                                    .response
                                    .get_or_insert_with(String::new)
                                    .push_str(text);
                            }
                        }
                        ResponsesContentPart::Refusal { refusal } => {
                            saw_refusal = true;
                            if !refusal.is_empty() {
                                out.texts
                                    .response
                                    .get_or_insert_with(String::new)
                                    .push_str(refusal);
                            }
                        }
                        ResponsesContentPart::Unknown => {}
                    }
                }
            }
            ResponsesOutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                let mut call = ToolCall::new(
                    name.clone().unwrap_or_default(),
                    call_id
                        .clone()
                        .or_else(|| id.clone())
                        .unwrap_or_default(),
                );
                if let Some(arguments) = arguments {
                    apply_arguments(&mut call, arguments);
                }
                out.tool_calls.push(call);
            }
            ResponsesOutputItem::Reasoning { summary } => {
                for part in summary {
                    if let ResponsesSummaryPart::SummaryText { text } = part {
                        if !text.is_empty() {
                            out.texts
                                .reasoning
                                .get_or_insert_with(String::new)
                                .push_str(text);
                        }
                    }
                }
            }
            ResponsesOutputItem::Unknown => {}
        }
    }

    let mut metadata = Metadata {
        response_id: Some(resp.id.clone()),
        model: resp.model.clone(),
        created_at: resp.created_at,
        finish_reason: Some(finish_reason(resp, saw_refusal, !out.tool_calls.is_empty())),
        ..Metadata::default()
    };
    if let Some(usage) = &resp.usage {
        apply_usage(&mut metadata, usage);
    }
    out.metadata = Some(metadata);
    out
}

/// Parses an authoritative `arguments` string into a call's parameters,
/// surfacing the raw text when it fails to parse.
pub(crate) fn apply_arguments(call: &mut ToolCall, arguments: &str) {
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(JsonValue::Object(map)) => {
            for (key, value) in map {
                call.parameters.insert(key, Value::from_json(value));
            }
        }
        _ if arguments.is_empty() => {}
        _ => {
            call.parameters.insert(
                "_parseError".to_string(),
                Value::from("function call arguments were not valid JSON"),
            );
            call.parameters
                .insert("_rawArguments".to_string(), Value::from(arguments));
        }
    }
}

fn finish_reason(resp: &ResponsesResponse, saw_refusal: bool, has_tool_calls: bool) -> FinishReason {
    if saw_refusal {
        return FinishReason::ContentFilter;
    }
    if resp
        .incomplete_details
        .as_ref()
        .and_then(|details| details.reason.as_deref())
        == Some("max_output_tokens")
    {
        return FinishReason::MaxTokens;
    }
    if has_tool_calls {
        return FinishReason::ToolUse;
    }
    match resp.status.as_deref() {
        Some("completed") => FinishReason::Stop,
        Some("incomplete") => FinishReason::MaxTokens,
        _ => FinishReason::Other,
    }
}

pub(crate) fn apply_usage(metadata: &mut Metadata, usage: &ResponsesUsage) {
    metadata.input_tokens = usage.input_tokens;
    metadata.output_tokens = usage.output_tokens;
    metadata.total_tokens = usage.total_tokens;
    metadata.reasoning_tokens = usage
        .output_tokens_details
        .as_ref()
        .and_then(|details| details.reasoning_tokens);
    metadata.cache_read_input_tokens = usage
        .input_tokens_details
        .as_ref()
        .and_then(|details| details.cached_tokens);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn maps_message_function_call_and_reasoning_items() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "status": "completed",
            "model": "gpt-5",
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "thought"}]},
                {"type": "message", "content": [{"type": "output_text", "text": "Hello!"}]},
                {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "f", "arguments": "{\"x\": 1}"}
            ],
            "usage": {"input_tokens": 9, "output_tokens": 4, "total_tokens": 13,
                      "output_tokens_details": {"reasoning_tokens": 2}}
        }))
        .expect("decode");

        let mapped = map_response(&resp);
        assert_eq!(mapped.texts.response.as_deref(), Some("Hello!"));
        assert_eq!(mapped.texts.reasoning.as_deref(), Some("thought"));
        assert_eq!(mapped.tool_calls.len(), 1);
        assert_eq!(mapped.tool_calls[0].id, "call_1");
        assert_eq!(mapped.tool_calls[0].parameters.get("x"), Some(&Value::Int(1)));
        let metadata = mapped.metadata.expect("metadata");
        assert_eq!(metadata.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(metadata.reasoning_tokens, Some(2));
    }

    #[test]
    fn bad_arguments_surface_raw_text() {
        let mut call = ToolCall::new("f", "c1");
        apply_arguments(&mut call, "{\"broken\":");
        assert!(call.parameters.contains_key("_parseError"));
        assert_eq!(
            call.parameters.get("_rawArguments"),
            Some(&Value::from("{\"broken\":"))
        );
    }

    #[test]
    fn incomplete_due_to_tokens_maps_to_max_tokens() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_2",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": []
        }))
        .expect("decode");
        let mapped = map_response(&resp);
        assert_eq!(
            mapped.metadata.and_then(|m| m.finish_reason),
            Some(FinishReason::MaxTokens)
        );
    }
}
