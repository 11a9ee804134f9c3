use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::GenerationStream;
use crate::provider::assembler::{AssembledStream, SseAssembler};
use crate::types::{GenerationResponse, Metadata, ToolCall};
use crate::value::Value;

use super::response::{apply_arguments, map_response};
use super::types::{ResponsesOutputItem, ResponsesStreamEvent, ResponsesSummaryPart};

pub(crate) fn create_stream(
    body: HttpBodyStream,
    cancel: Option<CancellationToken>,
) -> GenerationStream {
    Box::pin(AssembledStream::new(body, true, ResponsesAssembler::new()).with_cancellation(cancel))
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

/// In-flight function-call record keyed by output item id.
struct StreamingCall {
    call_index: usize,
    arguments: String,
}

/// Snapshot assembler for the Responses streaming protocol.
///
/// Tracks `sequence_number` and the response id on every event so a
/// disconnected background stream can resume from `starting_after`.
pub(crate) struct ResponsesAssembler {
    snapshot: GenerationResponse,
    calls: BTreeMap<String, StreamingCall>,
    last_sequence: Option<u64>,
    response_id: Option<String>,
    terminal: bool,
}

impl ResponsesAssembler {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: GenerationResponse::default(),
            calls: BTreeMap::new(),
            last_sequence: None,
            response_id: None,
            terminal: false,
        }
    }

    /// Sequence number of the last consumed event.
    pub(crate) fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Response id captured from `response.created`.
    pub(crate) fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
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

    fn open_item(&mut self, item: ResponsesOutputItem, item_id: Option<String>) {
        match item {
            ResponsesOutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                let key = item_id.or(id).unwrap_or_default();
                let published_id = call_id.unwrap_or_else(|| key.clone());
                let mut call = ToolCall::new(name.unwrap_or_default(), published_id);
                let mut buffer = String::new();
                if let Some(arguments) = arguments {
                    buffer = arguments;
                    if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(&buffer) {
                        for (k, v) in map {
                            call.parameters.insert(k, Value::from_json(v));
                        }
                    }
                }
                self.snapshot.tool_calls.push(call);
                self.calls.insert(
                    key,
                    StreamingCall {
                        call_index: self.snapshot.tool_calls.len() - 1,
                        arguments: buffer,
                    },
                );
            }
            ResponsesOutputItem::Reasoning { summary } => {
                for part in summary {
                    if let ResponsesSummaryPart::SummaryText { text } = part {
                        self.append_reasoning(&text);
                    }
                }
            }
            // Message items stream their text through output_text.delta; the
            // item itself carries nothing to accumulate.
            ResponsesOutputItem::Message { .. } => {
                debug!("responses stream: message output item added");
            }
            ResponsesOutputItem::Unknown => {}
        }
    }

    fn on_event(
        &mut self,
        event: ResponsesStreamEvent,
    ) -> Result<Option<GenerationResponse>, LLMError> {
        if let Some(sequence) = event.sequence_number {
            self.last_sequence = Some(sequence);
        }

        match event.event_type.as_str() {
            "response.created" => {
                let Some(response) = event.response else {
                    return Err(LLMError::Parsing {
                        message: "response.created event missing response object".to_string(),
                    });
                };
                self.response_id = Some(response.id.clone());
                {
                    let metadata = self.metadata();
                    metadata.response_id = Some(response.id.clone());
                    metadata.model = response.model.clone();
                    metadata.created_at = response.created_at;
                }
                Ok(Some(self.snapshot.clone()))
            }
            "response.output_item.added" => {
                let Some(item) = event.item else {
                    return Ok(None);
                };
                self.open_item(item, event.item_id);
                Ok(Some(self.snapshot.clone()))
            }
            "response.output_text.delta" => {
                let delta = event.delta.unwrap_or_default();
                self.append_response(&delta);
                Ok(Some(self.snapshot.clone()))
            }
            "response.reasoning.delta" | "response.reasoning_summary_text.delta" => {
                let delta = event
                    .delta
                    .or(event.text)
                    .unwrap_or_default();
                self.append_reasoning(&delta);
                Ok(Some(self.snapshot.clone()))
            }
            "response.function_call_arguments.delta" => {
                let Some(item_id) = event.item_id else {
                    return Ok(None);
                };
                let Some(call) = self.calls.get_mut(&item_id) else {
                    return Err(LLMError::Parsing {
                        message: format!("arguments delta for unknown item {item_id}"),
                    });
                };
                call.arguments.push_str(event.delta.as_deref().unwrap_or_default());
                // Best-effort partial publication after each append.
                if let Ok(JsonValue::Object(map)) =
                    serde_json::from_str::<JsonValue>(&call.arguments)
                {
                    let index = call.call_index;
                    let published = &mut self.snapshot.tool_calls[index];
                    for (key, value) in map {
                        published.parameters.insert(key, Value::from_json(value));
                    }
                }
                Ok(Some(self.snapshot.clone()))
            }
            "response.function_call_arguments.done" => {
                let Some(item_id) = event.item_id else {
                    return Ok(None);
                };
                let Some(call) = self.calls.get_mut(&item_id) else {
                    return Err(LLMError::Parsing {
                        message: format!("arguments done for unknown item {item_id}"),
                    });
                };
                let authoritative = event.arguments.unwrap_or_else(|| call.arguments.clone());
                let index = call.call_index;
                apply_arguments(&mut self.snapshot.tool_calls[index], &authoritative);
                Ok(Some(self.snapshot.clone()))
            }
            "response.completed" => {
                let Some(response) = event.response else {
                    return Err(LLMError::Parsing {
                        message: "response.completed event missing response object".to_string(),
                    });
                };
                // The full object is authoritative over accumulated state.
                let rebuilt = map_response(&response);
                if rebuilt.texts.response.is_some() {
                    self.snapshot.texts.response = rebuilt.texts.response;
                }
                if rebuilt.texts.reasoning.is_some() {
                    self.snapshot.texts.reasoning = rebuilt.texts.reasoning;
                }
                if !rebuilt.tool_calls.is_empty() {
                    self.snapshot.tool_calls = rebuilt.tool_calls;
                }
                self.snapshot.metadata = rebuilt.metadata;
                self.terminal = true;
                Ok(Some(self.snapshot.clone()))
            }
            other => {
                debug!(event = other, "ignoring unrecognized responses event");
                Ok(None)
            }
        }
    }
}

impl SseAssembler for ResponsesAssembler {
    fn on_data(&mut self, payload: &str) -> Result<Vec<GenerationResponse>, LLMError> {
        let event: ResponsesStreamEvent = serde_json::from_str(payload)
            .map_err(|err| LLMError::parsing(format!("bad stream event: {err}"), payload))?;
        Ok(self.on_event(event)?.into_iter().collect())
    }

    fn on_end(&mut self) -> Result<Vec<GenerationResponse>, LLMError> {
        if self.terminal {
            Ok(Vec::new())
        } else {
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
