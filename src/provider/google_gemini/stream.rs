use std::collections::BTreeSet;

use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpBodyStream};
use crate::provider::GenerationStream;
use crate::provider::assembler::ChannelStream;
use crate::stream::{StreamDecoder, StreamEvent};
use crate::types::{FinishReason, GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::grounding::{render_sources, resolve_grounding_urls};
use super::types::{GeminiGenerateContentResponse, GeminiPart, GeminiUsageMetadata};

/// Wraps the SSE body in a producer task that assembles snapshots and, once
/// the stream ends, resolves grounding links before the final yield.
///
/// Cancelling the token ends the stream cleanly with the last snapshot.
pub(crate) fn create_stream(
    body: HttpBodyStream,
    transport: DynHttpTransport,
    cancel: Option<CancellationToken>,
) -> GenerationStream {
    let cancel = cancel.unwrap_or_default();
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut decoder = StreamDecoder::new(body, true);
        let mut assembler = GeminiAssembler::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(Ok(assembler.last_snapshot())).await;
                    return;
                }
                event = decoder.next() => match event {
                    Some(Ok(StreamEvent::Data(payload))) => match assembler.on_data(&payload) {
                        Ok(Some(snapshot)) => {
                            if tx.send(Ok(snapshot)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    },
                    Some(Ok(StreamEvent::Done)) | None => break,
                    Some(Err(err)) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        }

        let final_snapshot = assembler.finish(&transport).await;
        let _ = tx.send(Ok(final_snapshot)).await;
    });
    Box::pin(ChannelStream::new(rx))
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

/// Snapshot assembler over full `GenerateContentResponse` payloads.
pub(crate) struct GeminiAssembler {
    snapshot: GenerationResponse,
    grounding_urls: BTreeSet<String>,
}

impl GeminiAssembler {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: GenerationResponse::default(),
            grounding_urls: BTreeSet::new(),
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

    /// Consumes one payload; returns the updated snapshot unless the payload
    /// changed nothing visible.
    pub(crate) fn on_data(
        &mut self,
        payload: &str,
    ) -> Result<Option<GenerationResponse>, LLMError> {
        let chunk: GeminiGenerateContentResponse = serde_json::from_str(payload)
            .map_err(|err| LLMError::parsing(format!("bad stream chunk: {err}"), payload))?;

        if let Some(feedback) = &chunk.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                let message = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("prompt blocked: {reason}"));
                return Err(LLMError::Server {
                    status: 400,
                    message,
                });
            }
        }

        {
            let metadata = self.metadata();
            if metadata.response_id.is_none() {
                metadata.response_id = chunk.response_id.clone();
            }
            if metadata.model.is_none() {
                metadata.model = chunk.model_version.clone();
            }
        }

        if let Some(candidate) = chunk.candidates.first() {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                match reason {
                    "SAFETY" | "RECITATION" => {
                        return Err(LLMError::Server {
                            status: 400,
                            message: format!("generation blocked: {reason}"),
                        });
                    }
                    "MAX_TOKENS" => {
                        self.metadata().finish_reason = Some(FinishReason::MaxTokens);
                    }
                    "STOP" => {
                        self.metadata().finish_reason = Some(FinishReason::Stop);
                    }
                    // FINISH_REASON_UNSPECIFIED and friends: keep going.
                    _ => {}
                }
            }
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    self.apply_part(part);
                }
            }
            if let Some(grounding) = &candidate.grounding_metadata {
                for chunk in &grounding.grounding_chunks {
                    if let Some(uri) = chunk.web.as_ref().and_then(|web| web.uri.clone()) {
                        self.grounding_urls.insert(uri);
                    }
                }
            }
        }

        if let Some(usage) = &chunk.usage_metadata {
            self.merge_usage(usage);
        }

        Ok(Some(self.snapshot.clone()))
    }

    fn apply_part(&mut self, part: &GeminiPart) {
        if let Some(call) = &part.function_call {
            let mut tool_call = ToolCall::new(call.name.clone(), new_call_id());
            if let JsonValue::Object(map) = &call.args {
                for (key, value) in map {
                    tool_call
                        .parameters
                        .insert(key.clone(), Value::from_json(value.clone()));
                }
            }
            if let Some(signature) = &part.thought_signature {
                tool_call
                    .provider_metadata
                    .get_or_insert_with(Default::default)
                    .insert(
                        "thoughtSignature".to_string(),
                        Value::from(signature.clone()),
                    );
            }
            self.snapshot.tool_calls.push(tool_call);
            return;
        }

        if let Some(text) = &part.text {
            if part.thought == Some(true) {
                self.append_reasoning(text);
            } else {
                self.append_response(text);
            }
            return;
        }

        if let Some(code) = &part.executable_code {
            let language = code
                .language
                .as_deref()
                .unwrap_or("python")
                .to_ascii_lowercase();
            let fenced = format!("\n```{language}\n{}\n```\n", code.code);
            self.append_response(&fenced);
            return;
        }

        if let Some(result) = &part.code_execution_result {
            let output = result.output.as_deref().unwrap_or_default();
            let body = if output.is_empty() {
                result.outcome.clone().unwrap_or_default()
            } else {
                output.to_string()
            };
            if !body.is_empty() {
                let fenced = format!("\n```\n{body}\n```\n");
                self.append_response(&fenced);
            }
        }
    }

    fn merge_usage(&mut self, usage: &GeminiUsageMetadata) {
        let metadata = self.metadata();
        if usage.prompt_token_count.is_some() {
            metadata.input_tokens = usage.prompt_token_count;
        }
        if usage.candidates_token_count.is_some() {
            metadata.output_tokens = usage.candidates_token_count;
        }
        if usage.total_token_count.is_some() {
            metadata.total_tokens = usage.total_token_count;
        }
        if usage.thoughts_token_count.is_some() {
            metadata.reasoning_tokens = usage.thoughts_token_count;
        }
        if usage.cached_content_token_count.is_some() {
            metadata.cache_read_input_tokens = usage.cached_content_token_count;
        }
    }

    /// Final pass: resolve collected grounding links into `texts.notes` and
    /// settle the finish reason.
    pub(crate) async fn finish(mut self, transport: &DynHttpTransport) -> GenerationResponse {
        if !self.grounding_urls.is_empty() {
            let urls: Vec<String> = self.grounding_urls.iter().cloned().collect();
            let resolved = resolve_grounding_urls(transport, urls).await;
            if !resolved.is_empty() {
                self.snapshot
                    .texts
                    .notes
                    .get_or_insert_with(String::new)
                    .push_str(&render_sources(&resolved));
            }
        }
        // Gemini has no dedicated tool-use stop code; infer it from content.
        let finish = self.snapshot.metadata.as_ref().and_then(|m| m.finish_reason);
        if !self.snapshot.tool_calls.is_empty() && finish != Some(FinishReason::MaxTokens) {
            self.metadata().finish_reason = Some(FinishReason::ToolUse);
        } else if finish.is_none() {
            self.metadata().finish_reason = Some(FinishReason::Stop);
        }
        self.snapshot
    }

    /// Last assembled snapshot, yielded on cancellation.
    pub(crate) fn last_snapshot(&self) -> GenerationResponse {
        self.snapshot.clone()
    }
}

/// Gemini does not assign tool-call ids; generate a short local one.
fn new_call_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("call_{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn feed(assembler: &mut GeminiAssembler, payload: serde_json::Value) -> GenerationResponse {
        assembler
            .on_data(&payload.to_string())
            .expect("payload should assemble")
            .expect("snapshot")
    }

    #[test]
    fn thought_flag_routes_text_to_reasoning() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [
                {"text": "pondering...", "thought": true},
                {"text": "The answer is 4."}
            ], "role": "model"}}]}),
        );
        assert_eq!(snapshot.texts.reasoning.as_deref(), Some("pondering..."));
        assert_eq!(snapshot.texts.response.as_deref(), Some("The answer is 4."));
    }

    #[test]
    fn numeric_thought_flag_is_accepted() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [
                {"text": "hidden", "thought": 1}
            ]}}]}),
        );
        assert_eq!(snapshot.texts.reasoning.as_deref(), Some("hidden"));
        assert!(snapshot.texts.response.is_none());
    }

    #[test]
    fn function_call_gets_fresh_id_and_thought_signature() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [{
                "functionCall": {"name": "get_x", "args": {"a": 1}},
                "thoughtSignature": "SIG"
            }]}}]}),
        );
        assert_eq!(snapshot.tool_calls.len(), 1);
        let call = &snapshot.tool_calls[0];
        assert_eq!(call.name, "get_x");
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.parameters.get("a"), Some(&Value::Int(1)));
        assert_eq!(
            call.provider_metadata
                .as_ref()
                .and_then(|m| m.get("thoughtSignature")),
            Some(&Value::from("SIG"))
        );
    }

    #[test]
    fn two_function_calls_get_distinct_ids() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [
                {"functionCall": {"name": "a", "args": {}}},
                {"functionCall": {"name": "b", "args": {}}}
            ]}}]}),
        );
        assert_ne!(snapshot.tool_calls[0].id, snapshot.tool_calls[1].id);
    }

    #[test]
    fn executable_code_and_result_render_as_fences() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [
                {"executableCode": {"language": "PYTHON", "code": "print(2+2)"}},
                {"codeExecutionResult": {"outcome": "OUTCOME_OK", "output": "4\n"}}
            ]}}]}),
        );
        let text = snapshot.texts.response.expect("response");
        assert!(text.contains("```python\nprint(2+2)\n```"));
        assert!(text.contains("```\n4\n"));
    }

    #[test]
    fn safety_finish_is_a_server_error() {
        let mut assembler = GeminiAssembler::new();
        let result = assembler.on_data(
            &json!({"candidates": [{"finishReason": "SAFETY"}]}).to_string(),
        );
        match result {
            Err(LLMError::Server { message, .. }) => assert!(message.contains("SAFETY")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn block_reason_fails_with_block_message() {
        let mut assembler = GeminiAssembler::new();
        let result = assembler.on_data(
            &json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT", "blockReasonMessage": "nope"}})
                .to_string(),
        );
        match result {
            Err(LLMError::Server { message, .. }) => assert_eq!(message, "nope"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn usage_metadata_maps_thoughts_to_reasoning_tokens() {
        let mut assembler = GeminiAssembler::new();
        let snapshot = feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1,
                                     "totalTokenCount": 9, "thoughtsTokenCount": 5}}),
        );
        let metadata = snapshot.metadata.expect("metadata");
        assert_eq!(metadata.input_tokens, Some(3));
        assert_eq!(metadata.output_tokens, Some(1));
        assert_eq!(metadata.reasoning_tokens, Some(5));
        assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn grounding_chunks_collect_for_final_notes() {
        let mut assembler = GeminiAssembler::new();
        feed(
            &mut assembler,
            json!({"candidates": [{"content": {"parts": [{"text": "cited"}]},
                   "groundingMetadata": {"groundingChunks": [
                       {"web": {"uri": "https://redirect.example/b"}},
                       {"web": {"uri": "https://redirect.example/a"}},
                       {"web": {"uri": "https://redirect.example/a"}}
                   ]}}]}),
        );
        assert_eq!(assembler.grounding_urls.len(), 2);
        assert!(assembler.last_snapshot().texts.notes.is_none());
    }
}
