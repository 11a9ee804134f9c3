use std::collections::HashMap;

use crate::error::LLMError;
use crate::provider::{DynProvider, GenerationStream, RetryConfig, retry_with_backoff};
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

/// Routes generation requests through the set of registered providers.
///
/// The client stores provider handles in-memory, making it trivial to share
/// one instance across the application and pick the right backend per
/// request.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use hashi::client::LLMClient;
/// use hashi::http::reqwest::default_dyn_transport;
/// use hashi::provider::anthropic_messages::AnthropicMessagesProvider;
///
/// let transport = default_dyn_transport().expect("transport");
/// let provider = AnthropicMessagesProvider::new(transport, "api-key")
///     .with_default_model("claude-sonnet-4-5");
/// let client = LLMClient::builder()
///     .register_handle("anthropic", Arc::new(provider))
///     .expect("unique handle")
///     .build();
/// assert_eq!(client.handles(), vec!["anthropic".to_string()]);
/// ```
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    /// Creates a builder used to register providers before constructing the
    /// client.
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    /// Sends a generation request to the provider registered under `handle`
    /// and waits for the complete response.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] when `handle` is not registered,
    /// or propagates any error raised by the provider.
    pub async fn generate(
        &self,
        handle: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.generate(request).await
    }

    /// Retries [`LLMClient::generate`] on retryable errors with exponential
    /// backoff, honouring provider `retry_after` hints.
    pub async fn generate_with_retry(
        &self,
        handle: &str,
        request: GenerationRequest,
        config: RetryConfig,
    ) -> Result<GenerationResponse, LLMError> {
        let provider = self.get_provider(handle)?;
        retry_with_backoff(&config, || provider.generate(request.clone())).await
    }

    /// Starts a streaming generation, yielding successive accumulated
    /// snapshots; the final snapshot carries metadata.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] when the handle is missing, or
    /// any transport/provider error raised during stream setup.
    pub async fn stream(
        &self,
        handle: &str,
        request: GenerationRequest,
    ) -> Result<GenerationStream, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.stream(request).await
    }

    /// Lists every handle currently registered on the client.
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Returns the capability descriptor associated with `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] if the handle is unknown.
    pub fn capabilities(&self, handle: &str) -> Result<CapabilityDescriptor, LLMError> {
        let provider = self.get_provider(handle)?;
        Ok(provider.capabilities())
    }

    /// Lists handles whose providers declare tool-calling support.
    pub fn handles_supporting_tools(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.capabilities().supports_tools)
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    /// Lists handles whose providers support the background lifecycle.
    pub fn handles_supporting_background(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.capabilities().supports_background)
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::invalid_request(format!("unknown model handle: {handle}")))
    }
}

/// Builder used to register providers and construct an [`LLMClient`].
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// Registers a provider under a unique handle.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] if the handle already exists.
    pub fn register_handle<S: Into<String>>(
        mut self,
        handle: S,
        provider: DynProvider,
    ) -> Result<Self, LLMError> {
        let handle = handle.into();
        if self.providers.contains_key(&handle) {
            return Err(LLMError::invalid_request(format!(
                "duplicate model handle: {handle}"
            )));
        }
        self.providers.insert(handle, provider);
        Ok(self)
    }

    /// Consumes the builder and returns the configured [`LLMClient`].
    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}
