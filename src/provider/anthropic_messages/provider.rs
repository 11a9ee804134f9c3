use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Credential, ModelConfig};
use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers,
};
use crate::media::{DynMediaAdapter, noop_media_adapter};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::{GenerationStream, LLMProvider};
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

use super::error::parse_anthropic_error;
use super::request::{build_anthropic_body, build_headers};
use super::response::map_response;
use super::stream::{collect_stream_text, create_stream};
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";
/// Long default so extended-thinking turns are not cut off mid-stream.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Anthropic Messages provider.
///
/// Converts the unified [`GenerationRequest`] into Messages API payloads and
/// assembles streaming responses into monotone snapshots.
pub struct AnthropicMessagesProvider {
    transport: DynHttpTransport,
    media: DynMediaAdapter,
    base_url: String,
    api_key: String,
    version: String,
    default_model: Option<String>,
}

impl AnthropicMessagesProvider {
    /// Creates a provider with the default base URL and `anthropic-version`.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            media: noop_media_adapter(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            default_model: None,
        }
    }

    /// Overrides the base URL, for proxies or compatibility layers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the `anthropic-version` header value.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Configures a default model for requests that do not specify one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Injects a media adapter for image resizing.
    pub fn with_media_adapter(mut self, media: DynMediaAdapter) -> Self {
        self.media = media;
        self
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
                    message: "anthropic_messages requires a credential".to_string(),
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
        if let Some(Value::String(version)) = config.extra.get("version") {
            provider = provider.with_version(version.clone());
        }
        Ok(provider)
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn resolve_model(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::invalid_request("model is required for Anthropic Messages"))
    }

    fn timeout(&self, request: &GenerationRequest) -> Duration {
        request.config.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            match parse_anthropic_error(status, &text) {
                LLMError::RateLimit { message, .. } => Err(LLMError::RateLimit {
                    message,
                    retry_after,
                }),
                other => Err(other),
            }
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, false, &self.media).await?;
        let headers = build_headers(&self.api_key, &self.version, &request.config.beta_features);
        let timeout = self.timeout(&request);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            headers,
            &body,
            Some(timeout),
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: AnthropicMessageResponse = serde_json::from_str(&text)
            .map_err(|err| LLMError::parsing(format!("bad Messages response: {err}"), &text))?;
        map_response(parsed)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, true, &self.media).await?;
        let headers = build_headers(&self.api_key, &self.version, &request.config.beta_features);
        let timeout = self.timeout(&request);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            headers,
            &body,
            Some(timeout),
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body).await?;
            return Err(parse_anthropic_error(response.status, &text));
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
            supports_background: false,
        }
    }

    fn name(&self) -> &'static str {
        "anthropic_messages"
    }
}
