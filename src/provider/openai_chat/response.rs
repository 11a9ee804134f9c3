use serde_json::Value as JsonValue;

use crate::error::LLMError;
use crate::types::{GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::stream::{convert_finish_reason, render_citations};
use super::types::{OpenAiChatResponse, OpenAiUsage};

/// Maps a complete Chat Completions response to the unified form.
pub(crate) fn map_response(resp: OpenAiChatResponse) -> Result<GenerationResponse, LLMError> {
    let mut out = GenerationResponse::default();

    if let Some(choice) = resp.choices.first() {
        if let Some(message) = &choice.message {
            if let Some(text) = &message.content {
                if !text.is_empty() {
                    out.texts.response = Some(text.clone());
                }
            }
            if let Some(text) = &message.reasoning_content {
                if !text.is_empty() {
                    out.texts.reasoning = Some(text.clone());
                }
            }
            for tool_call in message.tool_calls.iter().flatten() {
                let Some(function) = &tool_call.function else {
                    continue;
                };
                let name = function.name.clone().unwrap_or_default();
                let id = tool_call.id.clone().unwrap_or_default();
                let mut call = ToolCall::new(name, id);
                if let Some(arguments) = &function.arguments {
                    match serde_json::from_str::<JsonValue>(arguments) {
                        Ok(JsonValue::Object(map)) => {
                            for (key, value) in map {
                                call.parameters.insert(key, Value::from_json(value));
                            }
                        }
                        _ if !arguments.is_empty() => {
                            call.parameters.insert(
                                "_parseError".to_string(),
                                Value::from("tool arguments were not valid JSON"),
                            );
                        }
                        _ => {}
                    }
                }
                out.tool_calls.push(call);
            }
        }

        if let Some(citations) = &resp.citations {
            if !citations.is_empty() {
                out.texts.notes = Some(render_citations(citations));
            }
        }

        let mut metadata = Metadata {
            response_id: resp.id,
            model: resp.model,
            created_at: resp.created,
            finish_reason: choice.finish_reason.as_deref().map(convert_finish_reason),
            ..Metadata::default()
        };
        if let Some(usage) = &resp.usage {
            apply_usage(&mut metadata, usage);
        }
        out.metadata = Some(metadata);
    } else {
        return Err(LLMError::Parsing {
            message: "Chat Completions response contained no choices".to_string(),
        });
    }

    Ok(out)
}

fn apply_usage(metadata: &mut Metadata, usage: &OpenAiUsage) {
    metadata.input_tokens = usage.prompt_tokens;
    metadata.output_tokens = usage.completion_tokens;
    metadata.total_tokens = usage.total_tokens;
    metadata.reasoning_tokens = usage
        .completion_tokens_details
        .as_ref()
        .and_then(|details| details.reasoning_tokens);
    metadata.cache_read_input_tokens = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|details| details.cached_tokens);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::FinishReason;

    #[test]
    fn maps_text_choice() {
        let resp: OpenAiChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-9",
            "model": "gpt-4o",
            "created": 1714000000,
            "choices": [{
                "message": { "content": "Hi." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
        }))
        .expect("decode");

        let mapped = map_response(resp).expect("map");
        assert_eq!(mapped.texts.response.as_deref(), Some("Hi."));
        let metadata = mapped.metadata.expect("metadata");
        assert_eq!(metadata.created_at, Some(1714000000));
        assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn maps_tool_calls_with_json_arguments() {
        let resp: OpenAiChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "f", "arguments": "{\"x\": 1}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .expect("decode");

        let mapped = map_response(resp).expect("map");
        assert_eq!(mapped.tool_calls.len(), 1);
        assert_eq!(
            mapped.tool_calls[0].parameters.get("x"),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let resp: OpenAiChatResponse =
            serde_json::from_value(json!({ "choices": [] })).expect("decode");
        assert!(matches!(map_response(resp), Err(LLMError::Parsing { .. })));
    }
}
