use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::GenerationStream;
use crate::provider::assembler::{AssembledStream, SseAssembler};
use crate::types::{FinishReason, GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::types::{
    AnthropicContentBlock, AnthropicContentDelta, AnthropicStreamEvent, AnthropicUsage,
    CodeExecutionContent,
};

pub(crate) fn create_stream(
    body: HttpBodyStream,
    cancel: Option<CancellationToken>,
) -> GenerationStream {
    Box::pin(AssembledStream::new(body, false, AnthropicAssembler::new()).with_cancellation(cancel))
}

/// Collects a failed stream body so error payloads can be parsed.
pub(crate) async fn collect_stream_text(mut body: HttpBodyStream) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Parsing {
        message: format!("failed to decode stream error body: {err}"),
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::MaxTokens,
        "tool_use" => FinishReason::ToolUse,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Accumulation state for one content block.
enum BlockState {
    Text {
        citations: Vec<JsonValue>,
    },
    Thinking {
        signature: Option<String>,
    },
    ToolUse {
        /// Position of the published call in `snapshot.tool_calls`.
        call_index: usize,
        json_buf: String,
        parsed_once: bool,
    },
    ServerToolUse {
        name: String,
        json_buf: String,
        code: Option<String>,
    },
    Other,
}

/// Event-typed snapshot assembler for the Messages streaming protocol.
pub(crate) struct AnthropicAssembler {
    started: bool,
    terminal: bool,
    snapshot: GenerationResponse,
    blocks: BTreeMap<usize, BlockState>,
}

impl AnthropicAssembler {
    pub(crate) fn new() -> Self {
        Self {
            started: false,
            terminal: false,
            snapshot: GenerationResponse::default(),
            blocks: BTreeMap::new(),
        }
    }

    fn metadata(&mut self) -> &mut Metadata {
        self.snapshot.metadata.get_or_insert_with(Metadata::default)
    }

    fn append_response(&mut self, text: &str) {
        if !text.is_empty() {
            self.snapshot
                .texts
                .response
                .get_or_insert_with(String::new)
                .push_str(text);
        }
    }

    fn append_reasoning(&mut self, text: &str) {
        if !text.is_empty() {
            self.snapshot
                .texts
                .reasoning
                .get_or_insert_with(String::new)
                .push_str(text);
        }
    }

    fn merge_usage(&mut self, usage: &AnthropicUsage) {
        let metadata = self.metadata();
        if usage.input_tokens.is_some() {
            metadata.input_tokens = usage.input_tokens;
        }
        if usage.output_tokens.is_some() {
            metadata.output_tokens = usage.output_tokens;
        }
        if usage.cache_creation_input_tokens.is_some() {
            metadata.cache_creation_input_tokens = usage.cache_creation_input_tokens;
        }
        if usage.cache_read_input_tokens.is_some() {
            metadata.cache_read_input_tokens = usage.cache_read_input_tokens;
        }
        if let (Some(input), Some(output)) = (metadata.input_tokens, metadata.output_tokens) {
            metadata.total_tokens = Some(input + output);
        }
    }

    fn open_block(&mut self, index: usize, block: AnthropicContentBlock) {
        let state = match block {
            AnthropicContentBlock::Text { text, citations } => {
                self.append_response(&text);
                BlockState::Text {
                    citations: citations.unwrap_or_default(),
                }
            }
            AnthropicContentBlock::Thinking {
                thinking,
                signature,
            } => {
                self.append_reasoning(&thinking);
                BlockState::Thinking { signature }
            }
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let mut call = ToolCall::new(name, id);
                if let JsonValue::Object(map) = input {
                    for (key, value) in map {
                        call.parameters.insert(key, Value::from_json(value));
                    }
                }
                self.snapshot.tool_calls.push(call);
                BlockState::ToolUse {
                    call_index: self.snapshot.tool_calls.len() - 1,
                    json_buf: String::new(),
                    parsed_once: false,
                }
            }
            AnthropicContentBlock::ServerToolUse { name, input, .. } => {
                let code = input
                    .get("code")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                BlockState::ServerToolUse {
                    name,
                    json_buf: String::new(),
                    code,
                }
            }
            AnthropicContentBlock::CodeExecutionToolResult { content, .. } => {
                for item in &content {
                    let rendered = render_code_execution_item(item);
                    self.append_response(&rendered);
                }
                BlockState::Other
            }
            _ => BlockState::Other,
        };
        self.blocks.insert(index, state);
    }

    fn apply_delta(
        &mut self,
        index: usize,
        delta: AnthropicContentDelta,
    ) -> Result<(), LLMError> {
        // Pull the block state out to sidestep aliasing with the text appenders.
        let Some(mut state) = self.blocks.remove(&index) else {
            return Err(LLMError::Parsing {
                message: format!("content_block_delta for unknown block index {index}"),
            });
        };

        match (&mut state, delta) {
            (BlockState::Text { .. }, AnthropicContentDelta::TextDelta { text }) => {
                self.append_response(&text);
            }
            (
                BlockState::Text { citations },
                AnthropicContentDelta::CitationsDelta { citation },
            ) => {
                citations.push(citation);
            }
            (
                BlockState::Thinking { .. },
                AnthropicContentDelta::ThinkingDelta { thinking },
            ) => {
                self.append_reasoning(&thinking);
            }
            (
                BlockState::Thinking { signature: slot },
                AnthropicContentDelta::SignatureDelta { signature },
            ) => {
                *slot = Some(signature);
            }
            (
                BlockState::ToolUse {
                    call_index,
                    json_buf,
                    parsed_once,
                },
                AnthropicContentDelta::InputJsonDelta { partial_json },
            ) => {
                json_buf.push_str(&partial_json);
                let call = &mut self.snapshot.tool_calls[*call_index];
                call.parameters.insert(
                    Value::JSON_BUFFER_KEY.to_string(),
                    Value::from(json_buf.clone()),
                );
                if let Ok(JsonValue::Object(map)) =
                    serde_json::from_str::<JsonValue>(json_buf)
                {
                    *parsed_once = true;
                    for (key, value) in map {
                        call.parameters.insert(key, Value::from_json(value));
                    }
                }
            }
            (
                BlockState::ServerToolUse {
                    name,
                    json_buf,
                    code,
                },
                AnthropicContentDelta::InputJsonDelta { partial_json },
            ) => {
                json_buf.push_str(&partial_json);
                if name == "code_execution" {
                    if let Ok(value) = serde_json::from_str::<JsonValue>(json_buf) {
                        if let Some(text) = value.get("code").and_then(JsonValue::as_str) {
                            *code = Some(text.to_string());
                        }
                    }
                }
            }
            // Mismatched or unknown deltas are tolerated without effect.
            _ => {}
        }

        self.blocks.insert(index, state);
        Ok(())
    }

    fn close_block(&mut self, index: usize) {
        let Some(state) = self.blocks.get_mut(&index) else {
            return;
        };
        match state {
            BlockState::ToolUse {
                call_index,
                json_buf,
                parsed_once,
            } => {
                let call_index = *call_index;
                let had_parse = *parsed_once;
                // One final parse attempt before publishing.
                let parsed = serde_json::from_str::<JsonValue>(json_buf).ok();
                let buffer = json_buf.clone();
                let call = &mut self.snapshot.tool_calls[call_index];
                match parsed {
                    Some(JsonValue::Object(map)) => {
                        for (key, value) in map {
                            call.parameters.insert(key, Value::from_json(value));
                        }
                    }
                    _ if !had_parse && !buffer.is_empty() => {
                        call.parameters.insert(
                            "_parseError".to_string(),
                            Value::from("tool input was not valid JSON"),
                        );
                        call.parameters
                            .insert("_rawArguments".to_string(), Value::from(buffer));
                    }
                    // A previously successful parse stays published as-is.
                    _ => {}
                }
                call.parameters.remove(Value::JSON_BUFFER_KEY);
            }
            BlockState::ServerToolUse { name, code, .. } => {
                if name == "code_execution" {
                    if let Some(code) = code.take() {
                        let fenced = format!("\n```python\n{code}\n```\n");
                        self.append_response(&fenced);
                    }
                }
            }
            BlockState::Text { citations } => {
                if citations.is_empty() {
                    return;
                }
                let rendered = render_citations(std::mem::take(citations));
                if !rendered.is_empty() {
                    self.snapshot
                        .texts
                        .notes
                        .get_or_insert_with(String::new)
                        .push_str(&rendered);
                }
            }
            _ => {}
        }
    }

    fn on_event(
        &mut self,
        event: AnthropicStreamEvent,
    ) -> Result<Option<GenerationResponse>, LLMError> {
        if !self.started
            && !matches!(
                event,
                AnthropicStreamEvent::MessageStart { .. }
                    | AnthropicStreamEvent::Ping
                    | AnthropicStreamEvent::Error { .. }
            )
        {
            return Err(LLMError::Parsing {
                message: "stream event arrived before message_start".to_string(),
            });
        }

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.started = true;
                {
                    let metadata = self.metadata();
                    metadata.response_id = message.id;
                    metadata.model = message.model;
                }
                if let Some(usage) = &message.usage {
                    self.merge_usage(usage);
                }
                for (index, block) in message.content.into_iter().enumerate() {
                    self.open_block(index, block);
                }
                Ok(Some(self.snapshot.clone()))
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::Unknown => Ok(None),
            AnthropicStreamEvent::Error { error } => Err(LLMError::Server {
                status: 500,
                message: if error.kind.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.kind, error.message)
                },
            }),
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.open_block(index, content_block);
                Ok(Some(self.snapshot.clone()))
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                self.apply_delta(index, delta)?;
                Ok(Some(self.snapshot.clone()))
            }
            AnthropicStreamEvent::ContentBlockStop { index } => {
                self.close_block(index);
                Ok(Some(self.snapshot.clone()))
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.metadata().finish_reason = Some(convert_finish_reason(reason));
                }
                if let Some(usage) = &usage {
                    self.merge_usage(usage);
                }
                Ok(Some(self.snapshot.clone()))
            }
            AnthropicStreamEvent::MessageStop => {
                self.terminal = true;
                Ok(Some(self.snapshot.clone()))
            }
        }
    }
}

impl SseAssembler for AnthropicAssembler {
    fn on_data(&mut self, payload: &str) -> Result<Vec<GenerationResponse>, LLMError> {
        let event: AnthropicStreamEvent = serde_json::from_str(payload)
            .map_err(|err| LLMError::parsing(format!("bad stream event: {err}"), payload))?;
        Ok(self.on_event(event)?.into_iter().collect())
    }

    fn on_end(&mut self) -> Result<Vec<GenerationResponse>, LLMError> {
        if self.terminal {
            Ok(Vec::new())
        } else {
            // Upstream closed without message_stop; surface what was assembled.
            Ok(vec![self.snapshot.clone()])
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn last_snapshot(&self) -> GenerationResponse {
        self.snapshot.clone()
    }
}

/// Renders accumulated citation payloads as a bulleted note list.
fn render_citations(citations: Vec<JsonValue>) -> String {
    let mut lines = Vec::new();
    for citation in citations {
        let url = citation.get("url").and_then(JsonValue::as_str);
        let title = citation
            .get("title")
            .or_else(|| citation.get("cited_text"))
            .and_then(JsonValue::as_str);
        match (title, url) {
            (Some(title), Some(url)) => lines.push(format!("- {title} ({url})")),
            (None, Some(url)) => lines.push(format!("- {url}")),
            (Some(title), None) => lines.push(format!("- {title}")),
            (None, None) => {}
        }
    }
    if lines.is_empty() {
        String::new()
    } else {
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

fn render_code_execution_item(item: &CodeExecutionContent) -> String {
    match item {
        CodeExecutionContent::CodeExecutionResult {
            stdout,
            stderr,
            return_code,
        } => {
            let mut body = String::new();
            if !stdout.is_empty() {
                body.push_str(stdout);
            }
            if !stderr.is_empty() {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(stderr);
            }
            if body.is_empty() {
                if let Some(code) = return_code {
                    body = format!("exit status {code}");
                }
            }
            if body.is_empty() {
                String::new()
            } else {
                format!("\n```\n{body}\n```\n")
            }
        }
        CodeExecutionContent::CodeExecutionToolResultError { error_code } => {
            let code = error_code.as_deref().unwrap_or("unknown_error");
            format!("\n```\ncode execution failed: {code}\n```\n")
        }
        CodeExecutionContent::CodeExecutionOutput { file_id } => {
            format!("\n[code execution output file: {file_id}]\n")
        }
        CodeExecutionContent::Unknown => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn feed(assembler: &mut AnthropicAssembler, event: serde_json::Value) -> Vec<GenerationResponse> {
        assembler
            .on_data(&event.to_string())
            .expect("event should assemble")
    }

    #[test]
    fn basic_text_stream_assembles_hello_there() {
        let mut assembler = AnthropicAssembler::new();

        feed(
            &mut assembler,
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_X",
                    "model": "claude-sonnet-4-5",
                    "content": [],
                    "usage": {"input_tokens": 11, "output_tokens": 1}
                }
            }),
        );
        feed(
            &mut assembler,
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        );
        let snapshots = feed(
            &mut assembler,
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
        );
        assert_eq!(snapshots[0].texts.response.as_deref(), Some("Hello"));
        feed(
            &mut assembler,
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " there!"}}),
        );
        feed(&mut assembler, json!({"type": "content_block_stop", "index": 0}));
        feed(
            &mut assembler,
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 6}}),
        );
        let final_snapshots = feed(&mut assembler, json!({"type": "message_stop"}));

        assert!(assembler.is_terminal());
        let last = final_snapshots.last().expect("final snapshot");
        assert_eq!(last.texts.response.as_deref(), Some("Hello there!"));
        let metadata = last.metadata.as_ref().expect("metadata");
        assert_eq!(metadata.response_id.as_deref(), Some("msg_X"));
        assert_eq!(metadata.input_tokens, Some(11));
        assert_eq!(metadata.output_tokens, Some(6));
        assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn partial_json_tool_input_is_buffered_then_published() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "msg_1", "model": "m", "content": []}}),
        );
        feed(
            &mut assembler,
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
            }),
        );
        for fragment in ["{\"loca", "tion\": \"Pa", "ris\"}"] {
            feed(
                &mut assembler,
                json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "input_json_delta", "partial_json": fragment}
                }),
            );
        }

        // While in flight, the buffer is visible under the internal key.
        let in_flight = &assembler.snapshot.tool_calls[0];
        assert!(in_flight.parameters.contains_key(Value::JSON_BUFFER_KEY));
        assert_eq!(
            in_flight.parameters.get("location"),
            Some(&Value::from("Paris"))
        );

        let snapshots = feed(&mut assembler, json!({"type": "content_block_stop", "index": 0}));
        let call = &snapshots.last().expect("snapshot").tool_calls[0];
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.parameters.len(), 1);
        assert_eq!(call.parameters.get("location"), Some(&Value::from("Paris")));
    }

    #[test]
    fn truncated_tool_input_publishes_parse_error_sentinel() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "msg_1", "model": "m", "content": []}}),
        );
        feed(
            &mut assembler,
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}
            }),
        );
        feed(
            &mut assembler,
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": "{\"x\": \"trunc"}
            }),
        );
        let snapshots = feed(&mut assembler, json!({"type": "content_block_stop", "index": 0}));
        let call = &snapshots.last().expect("snapshot").tool_calls[0];
        assert!(call.parameters.contains_key("_parseError"));
        assert_eq!(
            call.parameters.get("_rawArguments"),
            Some(&Value::from("{\"x\": \"trunc"))
        );
        assert!(!call.parameters.contains_key(Value::JSON_BUFFER_KEY));
    }

    #[test]
    fn thinking_and_signature_deltas_accumulate() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "m", "model": "m", "content": []}}),
        );
        feed(
            &mut assembler,
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
        );
        feed(
            &mut assembler,
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "step one"}}),
        );
        feed(
            &mut assembler,
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "SIGN"}}),
        );
        let snapshots = feed(
            &mut assembler,
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": ", step two"}}),
        );
        assert_eq!(
            snapshots[0].texts.reasoning.as_deref(),
            Some("step one, step two")
        );
    }

    #[test]
    fn delta_before_message_start_is_a_parse_error() {
        let mut assembler = AnthropicAssembler::new();
        let result = assembler.on_data(
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "x"}})
                .to_string(),
        );
        assert!(matches!(result, Err(LLMError::Parsing { .. })));
    }

    #[test]
    fn error_event_surfaces_as_server_error() {
        let mut assembler = AnthropicAssembler::new();
        let result = assembler.on_data(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "try later"}})
                .to_string(),
        );
        match result {
            Err(LLMError::Server { message, .. }) => {
                assert!(message.contains("overloaded_error"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn code_execution_result_accepts_single_item_and_list() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "m", "model": "m", "content": []}}),
        );
        // Single object auto-wrapped.
        feed(
            &mut assembler,
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {
                    "type": "code_execution_tool_result",
                    "tool_use_id": "srvtoolu_1",
                    "content": {"type": "code_execution_result", "stdout": "42\n", "stderr": "", "return_code": 0}
                }
            }),
        );
        let text = assembler.snapshot.texts.response.clone().unwrap_or_default();
        assert!(text.contains("42"));
        // List form also accepted.
        feed(
            &mut assembler,
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {
                    "type": "code_execution_tool_result",
                    "tool_use_id": "srvtoolu_2",
                    "content": [{"type": "code_execution_output", "file_id": "file_9"}]
                }
            }),
        );
        let text = assembler.snapshot.texts.response.clone().unwrap_or_default();
        assert!(text.contains("file_9"));
    }

    #[test]
    fn server_tool_use_code_is_rendered_at_block_stop() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "m", "model": "m", "content": []}}),
        );
        feed(
            &mut assembler,
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "server_tool_use", "id": "srv_1", "name": "code_execution", "input": {}}
            }),
        );
        feed(
            &mut assembler,
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": "{\"code\": \"print(6*7)\"}"}
            }),
        );
        // Server-side tool use is not a caller-dispatchable call.
        assert!(assembler.snapshot.tool_calls.is_empty());
        feed(&mut assembler, json!({"type": "content_block_stop", "index": 0}));
        let text = assembler.snapshot.texts.response.clone().unwrap_or_default();
        assert!(text.contains("print(6*7)"));
        assert!(text.contains("```python"));
    }

    #[test]
    fn response_text_is_monotonically_nonshrinking() {
        let mut assembler = AnthropicAssembler::new();
        feed(
            &mut assembler,
            json!({"type": "message_start", "message": {"id": "m", "model": "m", "content": []}}),
        );
        feed(
            &mut assembler,
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        );
        let mut previous = String::new();
        for piece in ["a", "b", "c", "d"] {
            let snapshots = feed(
                &mut assembler,
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": piece}}),
            );
            let current = snapshots
                .last()
                .and_then(|s| s.texts.response.clone())
                .unwrap_or_default();
            assert!(current.starts_with(&previous));
            assert!(current.len() > previous.len());
            previous = current;
        }
    }
}
