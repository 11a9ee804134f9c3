use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Credential, ModelConfig};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::media::{DynMediaAdapter, noop_media_adapter};
use crate::provider::{GenerationStream, LLMProvider};
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

use super::background::{ResponsesContext, generate_background, stream_background};
use super::error::parse_responses_error;
use super::request::build_responses_body;
use super::response::map_response;
use super::stream::{collect_stream_text, create_stream};
use super::types::ResponsesResponse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_BACKGROUND_RETRIES: u32 = 5;

/// OpenAI Responses provider.
///
/// Beyond the ordinary generate/stream surface, this provider exposes the
/// background lifecycle: stored responses that can be polled, streamed with
/// resume-from-sequence, cancelled, and deleted.
pub struct OpenAiResponsesProvider {
    ctx: Arc<ResponsesContext>,
    media: DynMediaAdapter,
    default_model: Option<String>,
}

impl OpenAiResponsesProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            ctx: Arc::new(ResponsesContext {
                transport,
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key: api_key.into(),
                max_retries: DEFAULT_BACKGROUND_RETRIES,
            }),
            media: noop_media_adapter(),
            default_model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.mutate_ctx(|ctx| ctx.base_url = base_url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_media_adapter(mut self, media: DynMediaAdapter) -> Self {
        self.media = media;
        self
    }

    /// Bounds reconnect attempts for background streams.
    pub fn with_background_retries(mut self, max_retries: u32) -> Self {
        self.mutate_ctx(|ctx| ctx.max_retries = max_retries);
        self
    }

    fn mutate_ctx(&mut self, mutate: impl FnOnce(&mut ResponsesContext)) {
        let ctx = Arc::get_mut(&mut self.ctx)
            .expect("builder methods run before the context is shared");
        mutate(ctx);
    }

    /// Constructs a provider from declarative configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Authentication`] when the credential is missing.
    pub fn from_model_config(
        config: &ModelConfig,
        transport: DynHttpTransport,
    ) -> Result<Self, LLMError> {
        let api_key = match &config.credential {
            Credential::ApiKey { key } => key.clone(),
            Credential::Bearer { token } => token.clone(),
            Credential::None => {
                return Err(LLMError::Authentication {
                    message: "openai_responses requires a credential".to_string(),
                });
            }
        };
        let mut provider = Self::new(transport, api_key);
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(model) = &config.default_model {
            provider = provider.with_default_model(model.clone());
        }
        Ok(provider)
    }

    fn resolve_model(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::invalid_request("model is required for Responses"))
    }

    /// Submits a stored background request and polls it to completion.
    ///
    /// # Errors
    ///
    /// Fails when submission is rejected or the stored response reports
    /// `failed`; cancellation completes cleanly with partial output.
    pub async fn generate_background(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, LLMError> {
        let cancel = request.config.cancellation.clone().unwrap_or_default();
        self.generate_background_with_cancel(request, cancel).await
    }

    /// [`OpenAiResponsesProvider::generate_background`] with caller-driven
    /// cancellation.
    pub async fn generate_background_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_responses_body(&request, &model, false, true, &self.media).await?;
        generate_background(&self.ctx, body, cancel).await
    }

    /// Starts a background stream that survives transient disconnections by
    /// resuming from the last seen `sequence_number`.
    pub async fn stream_background(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationStream, LLMError> {
        let cancel = request.config.cancellation.clone().unwrap_or_default();
        self.stream_background_with_cancel(request, cancel).await
    }

    /// [`OpenAiResponsesProvider::stream_background`] with caller-driven
    /// cancellation; cancelling issues a best-effort server-side cancel and
    /// closes the stream after the last good snapshot.
    pub async fn stream_background_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_responses_body(&request, &model, true, true, &self.media).await?;
        stream_background(Arc::clone(&self.ctx), body, cancel).await
    }

    /// Fetches a stored response and converts it to the unified form.
    pub async fn get_response(&self, id: &str) -> Result<GenerationResponse, LLMError> {
        let stored = self.ctx.get_response(id).await?;
        Ok(map_response(&stored))
    }

    /// Cancels a stored background response (409 counts as success).
    pub async fn cancel_response(&self, id: &str) -> Result<(), LLMError> {
        self.ctx.cancel_response(id).await
    }

    /// Deletes a stored response.
    pub async fn delete_response(&self, id: &str) -> Result<(), LLMError> {
        self.ctx.delete_response(id).await
    }
}

#[async_trait]
impl LLMProvider for OpenAiResponsesProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let timeout = request.config.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let body = build_responses_body(&request, &model, false, false, &self.media).await?;
        let response = post_json_with_headers(
            self.ctx.transport.as_ref(),
            self.ctx.endpoint(),
            self.ctx.headers(),
            &body,
            Some(timeout),
        )
        .await?;
        let status = response.status;
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_responses_error(status, &text));
        }
        let parsed: ResponsesResponse = serde_json::from_str(&text)
            .map_err(|err| LLMError::parsing(format!("bad response object: {err}"), &text))?;
        Ok(map_response(&parsed))
    }

    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let timeout = request.config.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let body = build_responses_body(&request, &model, true, false, &self.media).await?;
        let response = post_json_stream_with_headers(
            self.ctx.transport.as_ref(),
            self.ctx.endpoint(),
            self.ctx.headers(),
            &body,
            Some(timeout),
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body).await?;
            return Err(parse_responses_error(response.status, &text));
        }
        Ok(create_stream(
            response.body,
            request.config.cancellation.clone(),
        ))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_image_input: true,
            supports_audio_input: false,
            supports_video_input: false,
            supports_document_input: true,
            supports_tools: true,
            supports_reasoning: true,
            supports_background: true,
        }
    }

    fn name(&self) -> &'static str {
        "openai_responses"
    }
}
