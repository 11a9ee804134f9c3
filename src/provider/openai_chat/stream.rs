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

use super::types::{OpenAiStreamChunk, OpenAiToolCallDelta, OpenAiUsage};

pub(crate) fn create_stream(
    body: HttpBodyStream,
    cancel: Option<CancellationToken>,
) -> GenerationStream {
    Box::pin(AssembledStream::new(body, true, ChatAssembler::new()).with_cancellation(cancel))
}

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
        "stop" | "end_turn" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::MaxTokens,
        "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Formats Perplexity-style citation URLs as numbered notes.
pub(crate) fn render_citations(citations: &[String]) -> String {
    citations
        .iter()
        .enumerate()
        .map(|(idx, url)| format!("[{}] {url}\n", idx + 1))
        .collect()
}

/// Per-index accumulation state for a streamed tool call.
struct ToolCallBuffer {
    /// Position of the call in `snapshot.tool_calls`.
    call_index: usize,
    arguments: String,
    parsed_once: bool,
}

/// Snapshot assembler for Chat Completions streaming.
pub(crate) struct ChatAssembler {
    snapshot: GenerationResponse,
    buffers: BTreeMap<u32, ToolCallBuffer>,
    citations_rendered: bool,
    finished: bool,
}

impl ChatAssembler {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: GenerationResponse::default(),
            buffers: BTreeMap::new(),
            citations_rendered: false,
            finished: false,
        }
    }

    fn metadata(&mut self) -> &mut Metadata {
        self.snapshot.metadata.get_or_insert_with(Metadata::default)
    }

    fn merge_usage(&mut self, usage: &OpenAiUsage) {
        let metadata = self.metadata();
        if usage.prompt_tokens.is_some() {
            metadata.input_tokens = usage.prompt_tokens;
        }
        if usage.completion_tokens.is_some() {
            metadata.output_tokens = usage.completion_tokens;
        }
        if usage.total_tokens.is_some() {
            metadata.total_tokens = usage.total_tokens;
        }
        if let Some(details) = &usage.completion_tokens_details {
            if details.reasoning_tokens.is_some() {
                metadata.reasoning_tokens = details.reasoning_tokens;
            }
        }
        if let Some(details) = &usage.prompt_tokens_details {
            if details.cached_tokens.is_some() {
                metadata.cache_read_input_tokens = details.cached_tokens;
            }
        }
    }

    fn apply_tool_call_delta(&mut self, delta: &OpenAiToolCallDelta) -> Result<(), LLMError> {
        if let Some(buffer) = self.buffers.get_mut(&delta.index) {
            if let Some(fragment) = delta.function.as_ref().and_then(|f| f.arguments.as_deref()) {
                buffer.arguments.push_str(fragment);
                // Best-effort parse after every append.
                if let Ok(JsonValue::Object(map)) =
                    serde_json::from_str::<JsonValue>(&buffer.arguments)
                {
                    buffer.parsed_once = true;
                    let call = &mut self.snapshot.tool_calls[buffer.call_index];
                    for (key, value) in map {
                        call.parameters.insert(key, Value::from_json(value));
                    }
                }
            }
            return Ok(());
        }

        // First sight of this index requires an id and a function name.
        let id = delta.id.clone().ok_or_else(|| LLMError::Parsing {
            message: format!("tool_calls[{}] opened without an id", delta.index),
        })?;
        let name = delta
            .function
            .as_ref()
            .and_then(|f| f.name.clone())
            .ok_or_else(|| LLMError::Parsing {
                message: format!("tool_calls[{}] opened without a function name", delta.index),
            })?;
        let mut arguments = String::new();
        if let Some(fragment) = delta.function.as_ref().and_then(|f| f.arguments.as_deref()) {
            arguments.push_str(fragment);
        }
        self.snapshot.tool_calls.push(ToolCall::new(name, id));
        let call_index = self.snapshot.tool_calls.len() - 1;
        let mut buffer = ToolCallBuffer {
            call_index,
            arguments,
            parsed_once: false,
        };
        if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(&buffer.arguments) {
            buffer.parsed_once = true;
            let call = &mut self.snapshot.tool_calls[call_index];
            for (key, value) in map {
                call.parameters.insert(key, Value::from_json(value));
            }
        }
        self.buffers.insert(delta.index, buffer);
        Ok(())
    }

    /// Final parse pass over unfinished argument buffers.
    fn finalize_tool_calls(&mut self) {
        for buffer in self.buffers.values_mut() {
            let call = &mut self.snapshot.tool_calls[buffer.call_index];
            match serde_json::from_str::<JsonValue>(&buffer.arguments) {
                Ok(JsonValue::Object(map)) => {
                    for (key, value) in map {
                        call.parameters.insert(key, Value::from_json(value));
                    }
                }
                _ if !buffer.parsed_once && !buffer.arguments.is_empty() => {
                    call.parameters.insert(
                        "_parseError".to_string(),
                        Value::from(format!(
                            "tool arguments were not valid JSON: {}",
                            truncate(&buffer.arguments, 128)
                        )),
                    );
                }
                _ => {}
            }
        }
        self.buffers.clear();
    }

    fn on_chunk(&mut self, chunk: OpenAiStreamChunk) -> Result<GenerationResponse, LLMError> {
        {
            let metadata = self.metadata();
            if metadata.response_id.is_none() {
                metadata.response_id = chunk.id.clone();
            }
            if metadata.model.is_none() {
                metadata.model = chunk.model.clone();
            }
            if metadata.created_at.is_none() {
                metadata.created_at = chunk.created;
            }
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(delta) = &choice.delta {
                if let Some(text) = &delta.content {
                    if !text.is_empty() {
                        self.snapshot
                            .texts
                            .response
                            .get_or_insert_with(String::new)
                            .push_str(text);
                    }
                }
                if let Some(text) = &delta.reasoning_content {
                    if !text.is_empty() {
                        self.snapshot
                            .texts
                            .reasoning
                            .get_or_insert_with(String::new)
                            .push_str(text);
                    }
                }
                if let Some(tool_calls) = &delta.tool_calls {
                    for tool_call in tool_calls {
                        self.apply_tool_call_delta(tool_call)?;
                    }
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.metadata().finish_reason = Some(convert_finish_reason(reason));
            }
        }

        if let Some(usage) = &chunk.usage {
            self.merge_usage(usage);
        }
        if let Some(citations) = &chunk.citations {
            if !self.citations_rendered && !citations.is_empty() {
                self.citations_rendered = true;
                let rendered = render_citations(citations);
                self.snapshot
                    .texts
                    .notes
                    .get_or_insert_with(String::new)
                    .push_str(&rendered);
            }
        }

        Ok(self.snapshot.clone())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

impl SseAssembler for ChatAssembler {
    fn on_data(&mut self, payload: &str) -> Result<Vec<GenerationResponse>, LLMError> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(payload)
            .map_err(|err| LLMError::parsing(format!("bad stream chunk: {err}"), payload))?;
        Ok(vec![self.on_chunk(chunk)?])
    }

    fn on_end(&mut self) -> Result<Vec<GenerationResponse>, LLMError> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;
        self.finalize_tool_calls();
        Ok(vec![self.snapshot.clone()])
    }

    fn is_terminal(&self) -> bool {
        self.finished
    }

    fn last_snapshot(&self) -> GenerationResponse {
        self.snapshot.clone()
    }
}
