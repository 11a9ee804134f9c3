use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest, post_json_stream_with_headers};
use crate::provider::GenerationStream;
use crate::provider::assembler::{ChannelStream, SseAssembler};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::types::GenerationResponse;

use super::error::parse_responses_error;
use super::response::map_response;
use super::stream::{ResponsesAssembler, collect_stream_text};
use super::types::ResponsesResponse;

/// Polling cadence for background (non-streaming) responses.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Shared endpoint wiring used by streaming, polling, and lifecycle calls.
pub(crate) struct ResponsesContext {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    /// Bound on reconnect attempts for background streams.
    pub(crate) max_retries: u32,
}

impl ResponsesContext {
    pub(crate) fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn response_url(&self, id: &str) -> String {
        format!("{}/{id}", self.endpoint())
    }

    pub(crate) fn headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    /// Fetches the stored response object.
    pub(crate) async fn get_response(&self, id: &str) -> Result<ResponsesResponse, LLMError> {
        let request = HttpRequest::get(self.response_url(id)).with_headers(self.headers());
        let response = self.transport.send(request).await?;
        let status = response.status;
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_responses_error(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|err| LLMError::parsing(format!("bad response object: {err}"), &text))
    }

    /// Requests cancellation of a stored response.
    ///
    /// A 409 means the response is already finished or cancelled, which
    /// callers treat as success.
    pub(crate) async fn cancel_response(&self, id: &str) -> Result<(), LLMError> {
        let url = format!("{}/cancel", self.response_url(id));
        let request = HttpRequest::post_json(url, Vec::new()).with_headers(self.headers());
        let response = self.transport.send(request).await?;
        let status = response.status;
        if (200..300).contains(&status) || status == 409 {
            Ok(())
        } else {
            let text = response.into_string()?;
            Err(parse_responses_error(status, &text))
        }
    }

    /// Deletes a stored response.
    pub(crate) async fn delete_response(&self, id: &str) -> Result<(), LLMError> {
        let request = HttpRequest::delete(self.response_url(id)).with_headers(self.headers());
        let response = self.transport.send(request).await?;
        let status = response.status;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            let text = response.into_string()?;
            Err(parse_responses_error(status, &text))
        }
    }
}

/// Runs a background (non-streaming) generation: submit, then poll every two
/// seconds until the stored response reaches a terminal status.
///
/// Cancellation issues a best-effort server-side cancel and returns whatever
/// the stored response held at that point.
pub(crate) async fn generate_background(
    ctx: &ResponsesContext,
    body: JsonValue,
    cancel: CancellationToken,
) -> Result<GenerationResponse, LLMError> {
    let request = HttpRequest::post_json(
        ctx.endpoint(),
        serde_json::to_vec(&body).map_err(|err| LLMError::InvalidRequest {
            message: format!("failed to serialize request: {err}"),
        })?,
    )
    .with_headers(ctx.headers());
    let response = ctx.transport.send(request).await?;
    let status = response.status;
    let text = response.into_string()?;
    if !(200..300).contains(&status) {
        return Err(parse_responses_error(status, &text));
    }
    let mut stored: ResponsesResponse = serde_json::from_str(&text)
        .map_err(|err| LLMError::parsing(format!("bad response object: {err}"), &text))?;

    loop {
        match stored.status.as_deref() {
            Some("completed") => return Ok(map_response(&stored)),
            Some("failed") => {
                let message = stored
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "background response failed".to_string());
                return Err(LLMError::Server {
                    status: 500,
                    message,
                });
            }
            // Server-side cancellation completes cleanly with partial output.
            Some("cancelled") | Some("canceled") | Some("incomplete") => {
                return Ok(map_response(&stored));
            }
            _ => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(err) = ctx.cancel_response(&stored.id).await {
                    warn!(error = %err, "best-effort background cancel failed");
                }
                return Ok(map_response(&stored));
            }
            _ = sleep(POLL_INTERVAL) => {}
        }
        debug!(id = %stored.id, "polling background response");
        stored = ctx.get_response(&stored.id).await?;
    }
}

/// Starts a background streaming generation with automatic resume.
///
/// The producer task records every event's `sequence_number`; on a transient
/// disconnection it probes the stored response and, while the server still
/// reports queued/in_progress, reconnects with `starting_after=<lastSeq>`
/// under exponential backoff bounded by `max_retries`.
pub(crate) async fn stream_background(
    ctx: std::sync::Arc<ResponsesContext>,
    body: JsonValue,
    cancel: CancellationToken,
) -> Result<GenerationStream, LLMError> {
    let initial = post_json_stream_with_headers(
        ctx.transport.as_ref(),
        ctx.endpoint(),
        ctx.headers(),
        &body,
        None,
    )
    .await?;
    if !(200..300).contains(&initial.status) {
        let text = collect_stream_text(initial.body).await?;
        return Err(parse_responses_error(initial.status, &text));
    }

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        run_background_stream(ctx, initial.body, cancel, tx).await;
    });
    Ok(Box::pin(ChannelStream::new(rx)))
}

async fn run_background_stream(
    ctx: std::sync::Arc<ResponsesContext>,
    first_body: crate::http::HttpBodyStream,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<GenerationResponse, LLMError>>,
) {
    let mut assembler = ResponsesAssembler::new();
    let mut decoder = Some(StreamDecoder::new(first_body, true));
    let mut attempt = 0u32;

    loop {
        if let Some(active) = decoder.as_mut() {
            match drive_connection(active, &mut assembler, &cancel, &tx).await {
                ConnectionOutcome::Finished => return,
                ConnectionOutcome::Cancelled => {
                    if let Some(id) = assembler.response_id() {
                        if let Err(err) = ctx.cancel_response(id).await {
                            warn!(error = %err, "best-effort background cancel failed");
                        }
                    }
                    let _ = tx.send(Ok(assembler.last_snapshot())).await;
                    return;
                }
                ConnectionOutcome::ConsumerGone => return,
                ConnectionOutcome::Disconnected => {}
            }
            decoder = None;
        }

        // Transient disconnection: probe the stored response, then resume.
        let Some(id) = assembler.response_id().map(str::to_string) else {
            let _ = tx
                .send(Err(LLMError::network(
                    "background stream lost before response.created",
                )))
                .await;
            return;
        };

        match ctx.get_response(&id).await {
            Ok(stored) => match stored.status.as_deref() {
                Some("completed") => {
                    let _ = tx.send(Ok(map_response(&stored))).await;
                    return;
                }
                Some("failed") => {
                    let message = stored
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "background response failed".to_string());
                    let _ = tx
                        .send(Err(LLMError::Server {
                            status: 500,
                            message,
                        }))
                        .await;
                    return;
                }
                Some("cancelled") | Some("canceled") => {
                    let _ = tx.send(Ok(assembler.last_snapshot())).await;
                    return;
                }
                // queued / in_progress: back off and reconnect.
                _ => {}
            },
            Err(err) => {
                debug!(error = %err, "status probe failed before resume");
            }
        }

        if attempt >= ctx.max_retries {
            let _ = tx
                .send(Err(LLMError::network(
                    "background stream reconnect attempts exhausted",
                )))
                .await;
            return;
        }
        let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(err) = ctx.cancel_response(&id).await {
                    warn!(error = %err, "best-effort background cancel failed");
                }
                let _ = tx.send(Ok(assembler.last_snapshot())).await;
                return;
            }
            _ = sleep(backoff) => {}
        }

        let resume_url = format!(
            "{}?stream=true&starting_after={}",
            ctx.response_url(&id),
            assembler.last_sequence().unwrap_or(0)
        );
        debug!(url = %resume_url, "resuming background stream");
        let request = HttpRequest::get(resume_url).with_headers(ctx.headers());
        match ctx.transport.send_stream(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                attempt = 0;
                decoder = Some(StreamDecoder::new(response.body, true));
            }
            Ok(response) => {
                let err = match collect_stream_text(response.body).await {
                    Ok(text) => parse_responses_error(response.status, &text),
                    Err(err) => err,
                };
                if !err.is_retryable() {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
            Err(err) if err.is_retryable() => {
                debug!(error = %err, "resume connection failed");
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

enum ConnectionOutcome {
    /// Terminal event consumed; the stream is complete.
    Finished,
    /// The caller cancelled; compensate and close.
    Cancelled,
    /// The receiving side dropped the stream.
    ConsumerGone,
    /// Transient failure or early end-of-stream; try to resume.
    Disconnected,
}

async fn drive_connection(
    decoder: &mut StreamDecoder,
    assembler: &mut ResponsesAssembler,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Result<GenerationResponse, LLMError>>,
) -> ConnectionOutcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ConnectionOutcome::Cancelled,
            event = decoder.next() => match event {
                Some(Ok(StreamEvent::Data(payload))) => match assembler.on_data(&payload) {
                    Ok(snapshots) => {
                        for snapshot in snapshots {
                            if tx.send(Ok(snapshot)).await.is_err() {
                                return ConnectionOutcome::ConsumerGone;
                            }
                        }
                        if assembler.is_terminal() {
                            return ConnectionOutcome::Finished;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return ConnectionOutcome::Finished;
                    }
                },
                Some(Ok(StreamEvent::Done)) | None => {
                    if assembler.is_terminal() {
                        return ConnectionOutcome::Finished;
                    }
                    return ConnectionOutcome::Disconnected;
                }
                Some(Err(err)) if err.is_retryable() => {
                    debug!(error = %err, "background stream connection dropped");
                    return ConnectionOutcome::Disconnected;
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(err)).await;
                    return ConnectionOutcome::Finished;
                }
            }
        }
    }
}

