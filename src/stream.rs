use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider, one event per blank line.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes provider SSE feeds into [`StreamEvent`] values.
///
/// The decoder is line-oriented: `data:` lines accumulate into the current
/// event, `:` comment lines are dropped, and every other field (`event:`,
/// `id:`, `retry:`) is consumed without affecting event boundaries. A blank
/// line flushes the accumulated payloads, joined with `\n`, as one event.
///
/// When `terminate_on_done` is set, a payload equal to `[DONE]` yields
/// [`StreamEvent::Done`] and ends the stream; otherwise the marker is passed
/// through as data (Gemini and Anthropic never send it).
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    terminate_on_done: bool,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, terminate_on_done: bool) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            terminate_on_done,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if line.first() == Some(&b':') {
            // Comment line.
            return;
        }
        if line.starts_with(b"data:") {
            let mut data = line[5..].to_vec();
            if data.first() == Some(&b' ') {
                data.remove(0);
            }
            self.data_lines.push(data);
        }
        // Other fields are consumed but do not alter the event boundary.
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }

        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| LLMError::Parsing {
            message: format!("invalid UTF-8 in stream chunk: {err}"),
        })?;

        if self.terminate_on_done && data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }

        Ok(())
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            // Drain already-buffered lines before touching the upstream body.
            while let Some(line) = Self::drain_line(&mut this.buffer) {
                if line.is_empty() {
                    if let Err(err) = this.flush_event() {
                        return Poll::Ready(Some(Err(err)));
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                } else {
                    this.handle_line(line);
                }
            }

            if this.stream_closed {
                if !this.buffer.is_empty() {
                    // Final line without a trailing newline.
                    let line = this.buffer.drain(..).collect::<Vec<u8>>();
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return this
                    .pending
                    .pop_front()
                    .map_or(Poll::Ready(None), |event| Poll::Ready(Some(event)));
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
