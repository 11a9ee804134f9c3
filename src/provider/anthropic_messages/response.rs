use serde_json::Value as JsonValue;

use crate::error::LLMError;
use crate::types::{GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::stream::convert_finish_reason;
use super::types::{AnthropicContentBlock, AnthropicMessageResponse, AnthropicUsage};

/// Maps a complete (non-streaming) Messages response to the unified form.
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
) -> Result<GenerationResponse, LLMError> {
    let mut out = GenerationResponse::default();

    for block in resp.content {
        match block {
            AnthropicContentBlock::Text { text, .. } => {
                if !text.is_empty() {
                    out.texts
                        .response
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                }
            }
            AnthropicContentBlock::Thinking { thinking, .. } => {
                if !thinking.is_empty() {
                    out.texts
                        .reasoning
                        .get_or_insert_with(String::new)
                        .push_str(&thinking);
                }
            }
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let mut call = ToolCall::new(name, id);
                if let JsonValue::Object(map) = input {
                    for (key, value) in map {
                        call.parameters.insert(key, Value::from_json(value));
                    }
                }
                out.tool_calls.push(call);
            }
            // Server-side blocks and media need no projection in the
            // non-streaming path.
            _ => {}
        }
    }

    let mut metadata = Metadata {
        response_id: resp.id,
        model: resp.model,
        finish_reason: resp.stop_reason.as_deref().map(convert_finish_reason),
        ..Metadata::default()
    };
    if let Some(usage) = &resp.usage {
        apply_usage(&mut metadata, usage);
    }
    out.metadata = Some(metadata);

    Ok(out)
}

fn apply_usage(metadata: &mut Metadata, usage: &AnthropicUsage) {
    metadata.input_tokens = usage.input_tokens;
    metadata.output_tokens = usage.output_tokens;
    metadata.cache_creation_input_tokens = usage.cache_creation_input_tokens;
    metadata.cache_read_input_tokens = usage.cache_read_input_tokens;
    metadata.total_tokens = usage
        .input_tokens
        .zip(usage.output_tokens)
        .map(|(input, output)| input + output);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::FinishReason;

    #[test]
    fn maps_text_response_with_usage() {
        let resp: AnthropicMessageResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-5",
            "content": [{"type": "text", "text": "Hi there."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 2}
        }))
        .expect("decode");

        let mapped = map_response(resp).expect("map");
        assert_eq!(mapped.texts.response.as_deref(), Some("Hi there."));
        let metadata = mapped.metadata.expect("metadata");
        assert_eq!(metadata.response_id.as_deref(), Some("msg_1"));
        assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));
        assert_eq!(metadata.input_tokens, Some(10));
        assert_eq!(metadata.output_tokens, Some(5));
        assert_eq!(metadata.total_tokens, Some(15));
        assert_eq!(metadata.cache_read_input_tokens, Some(2));
    }

    #[test]
    fn maps_tool_use_block_to_tool_call() {
        let resp: AnthropicMessageResponse = serde_json::from_value(json!({
            "id": "msg_2",
            "model": "m",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "get_weather",
                "input": {"location": "Paris", "days": 3}
            }],
            "stop_reason": "tool_use"
        }))
        .expect("decode");

        let mapped = map_response(resp).expect("map");
        assert_eq!(mapped.tool_calls.len(), 1);
        let call = &mapped.tool_calls[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.parameters.get("location"), Some(&Value::from("Paris")));
        assert_eq!(call.parameters.get("days"), Some(&Value::Int(3)));
        assert_eq!(
            mapped.metadata.and_then(|m| m.finish_reason),
            Some(FinishReason::ToolUse)
        );
    }
}
