use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::stream::{StreamDecoder, StreamEvent};
use crate::types::GenerationResponse;

/// Consumer-facing stream over a producer task's channel.
///
/// Dropping it closes the channel, which stops the producer at its next send.
pub(crate) struct ChannelStream {
    rx: mpsc::Receiver<Result<GenerationResponse, LLMError>>,
}

impl ChannelStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<GenerationResponse, LLMError>>) -> Self {
        Self { rx }
    }
}

impl Stream for ChannelStream {
    type Item = Result<GenerationResponse, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Per-provider incremental snapshot assembler.
///
/// Fed one SSE `data:` payload at a time; returns the snapshots made visible
/// by that payload. Snapshots must extend their predecessors: text channels
/// append, tool-call lists grow, published parameter keys survive.
pub(crate) trait SseAssembler: Send {
    /// Consumes one data payload.
    fn on_data(&mut self, payload: &str) -> Result<Vec<GenerationResponse>, LLMError>;

    /// Called at `[DONE]` or upstream end-of-stream.
    fn on_end(&mut self) -> Result<Vec<GenerationResponse>, LLMError>;

    /// Returns `true` once the assembler saw its protocol-level terminal event.
    fn is_terminal(&self) -> bool;

    /// Returns the last assembled snapshot, yielded on cancellation.
    fn last_snapshot(&self) -> GenerationResponse;
}

/// Drives a [`StreamDecoder`] through an [`SseAssembler`], yielding snapshots.
///
/// Cancelling the token ends the stream cleanly with the last good snapshot;
/// it never raises [`LLMError::Cancelled`] to the consumer.
pub(crate) struct AssembledStream<A> {
    decoder: StreamDecoder,
    assembler: A,
    pending: VecDeque<Result<GenerationResponse, LLMError>>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    finished: bool,
}

impl<A: SseAssembler> AssembledStream<A> {
    pub(crate) fn new(body: HttpBodyStream, terminate_on_done: bool, assembler: A) -> Self {
        Self {
            decoder: StreamDecoder::new(body, terminate_on_done),
            assembler,
            pending: VecDeque::new(),
            cancelled: None,
            finished: false,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancelled = token.map(|token| Box::pin(token.cancelled_owned()));
        self
    }

    fn push_snapshots(&mut self, result: Result<Vec<GenerationResponse>, LLMError>) {
        match result {
            Ok(snapshots) => self
                .pending
                .extend(snapshots.into_iter().map(Ok)),
            Err(err) => {
                self.pending.push_back(Err(err));
                self.finished = true;
            }
        }
    }
}

impl<A: SseAssembler + Unpin> Stream for AssembledStream<A> {
    type Item = Result<GenerationResponse, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            if let Some(cancelled) = this.cancelled.as_mut() {
                if cancelled.as_mut().poll(cx).is_ready() {
                    this.finished = true;
                    return Poll::Ready(Some(Ok(this.assembler.last_snapshot())));
                }
            }

            match this.decoder.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(StreamEvent::Data(payload)))) => {
                    let result = this.assembler.on_data(&payload);
                    this.push_snapshots(result);
                    if this.assembler.is_terminal() && this.pending.iter().all(Result::is_ok) {
                        this.finished = true;
                    }
                }
                Poll::Ready(Some(Ok(StreamEvent::Done))) | Poll::Ready(None) => {
                    let result = this.assembler.on_end();
                    this.push_snapshots(result);
                    this.finished = true;
                }
                Poll::Ready(Some(Err(err))) => {
                    this.pending.push_back(Err(err));
                    this.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
