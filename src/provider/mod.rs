use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::LLMError;
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

pub mod anthropic_messages;
pub(crate) mod assembler;
pub mod google_gemini;
pub mod openai_chat;
pub mod openai_responses;
pub mod retry;

pub use retry::{RetryConfig, retry_with_backoff};

/// Stream alias returned by provider implementations.
///
/// Each yielded item is an accumulated snapshot extending the previous one:
/// text channels only append, the tool-call list only grows, and a call's
/// published parameters are refined but never truncated. The final snapshot
/// carries [`crate::types::Metadata`]. Cancellation ends the stream cleanly
/// after the last good snapshot.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<GenerationResponse, LLMError>> + Send>>;

/// Trait implemented by every provider integration.
///
/// Providers translate the unified [`GenerationRequest`] into a
/// vendor-specific HTTP call and map the response back to
/// [`GenerationResponse`] values or a [`GenerationStream`] of snapshots.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Submits a request and waits for the complete response.
    ///
    /// # Errors
    ///
    /// Implementations propagate any [`LLMError`] raised while invoking the
    /// remote provider.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LLMError>;

    /// Submits a request and returns a stream of accumulated snapshots.
    ///
    /// # Errors
    ///
    /// Transport failures surface as [`LLMError::Network`]; anything the
    /// provider rejects before streaming begins is mapped through
    /// [`LLMError::from_status`].
    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, LLMError>;

    /// Returns the provider's capability descriptor.
    fn capabilities(&self) -> CapabilityDescriptor;

    /// Returns the provider identifier used in logs and error reporting.
    fn name(&self) -> &'static str;
}

/// Thread-safe handle to a provider implementation.
pub type DynProvider = Arc<dyn LLMProvider>;
