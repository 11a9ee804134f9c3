use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Credential, ModelConfig};
use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers,
};
use crate::media::{DynMediaAdapter, noop_media_adapter};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::{GenerationStream, LLMProvider};
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

use super::error::parse_openai_error;
use super::request::build_chat_body;
use super::response::map_response;
use super::stream::{collect_stream_text, create_stream};
use super::types::OpenAiChatResponse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// xAI exposes the identical request surface.
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// OpenAI Chat Completions provider, also covering xAI and other
/// OpenAI-compatible endpoints.
pub struct OpenAiChatProvider {
    transport: DynHttpTransport,
    media: DynMediaAdapter,
    base_url: String,
    api_key: String,
    default_model: Option<String>,
}

impl OpenAiChatProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            media: noop_media_adapter(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: None,
        }
    }

    /// Points the provider at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
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
                    message: "openai_chat requires a credential".to_string(),
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

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    fn resolve_model(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::invalid_request("model is required for Chat Completions"))
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            match parse_openai_error(status, &text) {
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
impl LLMProvider for OpenAiChatProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_chat_body(&request, &model, false, &self.media).await?;
        let timeout = request.config.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &body,
            Some(timeout),
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: OpenAiChatResponse = serde_json::from_str(&text).map_err(|err| {
            LLMError::parsing(format!("bad Chat Completions response: {err}"), &text)
        })?;
        map_response(parsed)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_chat_body(&request, &model, true, &self.media).await?;
        let timeout = request.config.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &body,
            Some(timeout),
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body).await?;
            return Err(parse_openai_error(response.status, &text));
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
            supports_document_input: false,
            supports_tools: true,
            supports_reasoning: true,
            supports_background: false,
        }
    }

    fn name(&self) -> &'static str {
        "openai_chat"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::{HttpRequest, HttpStreamResponse, HttpTransport};

    struct UnusedTransport;

    #[async_trait]
    impl HttpTransport for UnusedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("not exercised");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("not exercised");
        }
    }

    #[test]
    fn endpoint_appends_chat_completions() {
        let provider = OpenAiChatProvider::new(Arc::new(UnusedTransport), "key");
        assert_eq!(
            provider.endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        let xai = OpenAiChatProvider::new(Arc::new(UnusedTransport), "key")
            .with_base_url(XAI_BASE_URL);
        assert_eq!(xai.endpoint(), "https://api.x.ai/v1/chat/completions");
    }
}
