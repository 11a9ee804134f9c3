//! In-memory transport for driving providers from scripted fixtures.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use hashi::LLMError;
use hashi::http::{HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// One scripted streaming connection.
pub struct ScriptedStream {
    pub status: u16,
    pub chunks: Vec<Result<Vec<u8>, LLMError>>,
    /// Keep the connection open (pending) after the chunks are exhausted.
    pub hang_after: bool,
}

impl ScriptedStream {
    pub fn ok(chunks: Vec<Result<Vec<u8>, LLMError>>) -> Self {
        Self {
            status: 200,
            chunks,
            hang_after: false,
        }
    }

    #[allow(dead_code)]
    pub fn hanging(chunks: Vec<Result<Vec<u8>, LLMError>>) -> Self {
        Self {
            status: 200,
            chunks,
            hang_after: true,
        }
    }
}

/// Transport that replays scripted responses and records every request.
#[derive(Default)]
pub struct MockTransport {
    send_responses: Mutex<VecDeque<HttpResponse>>,
    stream_responses: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.send_responses.lock().unwrap().push_back(HttpResponse {
            status,
            headers: Default::default(),
            body: body.as_bytes().to_vec(),
            final_url: None,
        });
    }

    pub fn push_stream(&self, scripted: ScriptedStream) {
        self.stream_responses.lock().unwrap().push_back(scripted);
    }

    pub fn recorded_requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.requests.lock().unwrap().push(request);
        self.send_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::network("no scripted response left"))
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.requests.lock().unwrap().push(request);
        let scripted = self
            .stream_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::network("no scripted stream left"))?;
        let body: HttpBodyStream = if scripted.hang_after {
            Box::pin(stream::iter(scripted.chunks).chain(stream::pending()))
        } else {
            Box::pin(stream::iter(scripted.chunks))
        };
        Ok(HttpStreamResponse {
            status: scripted.status,
            headers: Default::default(),
            body,
        })
    }
}

/// Renders JSON events as an SSE byte payload, one event per `data:` line.
pub fn sse_body(events: &[serde_json::Value]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for event in events {
        bytes.extend_from_slice(b"data: ");
        bytes.extend_from_slice(event.to_string().as_bytes());
        bytes.extend_from_slice(b"\n\n");
    }
    bytes
}
