use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::{Credential, ModelConfig};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers};
use crate::media::{DynMediaAdapter, noop_media_adapter};
use crate::provider::{GenerationStream, LLMProvider};
use crate::types::{CapabilityDescriptor, GenerationRequest, GenerationResponse};

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::stream::{collect_stream_text, create_stream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider over `streamGenerateContent`.
///
/// The endpoint only streams; non-streaming generation drains the stream to
/// its final snapshot. No request timeout is applied so long
/// extended-thinking responses are not cut off.
pub struct GoogleGeminiProvider {
    transport: DynHttpTransport,
    media: DynMediaAdapter,
    base_url: String,
    api_key: String,
    default_model: Option<String>,
}

impl GoogleGeminiProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            media: noop_media_adapter(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: None,
        }
    }

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
                    message: "google_gemini requires a credential".to_string(),
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

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?key={}&alt=sse",
            self.base_url.trim_end_matches('/'),
            self.api_key
        )
    }

    fn resolve_model(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::invalid_request("model is required for Gemini"))
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<GenerationStream, LLMError> {
        let model = self.resolve_model(request)?;
        let body = build_gemini_body(
            request,
            &self.transport,
            &self.media,
            &self.base_url,
            &self.api_key,
        )
        .await?;
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(&model),
            Default::default(),
            &body,
            // No per-request deadline; extended thinking can run long.
            request.config.timeout,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body).await?;
            return Err(parse_gemini_error(response.status, &text));
        }
        Ok(create_stream(
            response.body,
            self.transport.clone(),
            request.config.cancellation.clone(),
        ))
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LLMError> {
        // The API always streams; drain to the final snapshot.
        let mut stream = self.open_stream(&request).await?;
        let mut last = None;
        while let Some(snapshot) = stream.next().await {
            last = Some(snapshot?);
        }
        last.ok_or_else(|| LLMError::Parsing {
            message: "Gemini stream ended without yielding a response".to_string(),
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, LLMError> {
        self.open_stream(&request).await
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_image_input: true,
            supports_audio_input: true,
            supports_video_input: true,
            supports_document_input: true,
            supports_tools: true,
            supports_reasoning: true,
            supports_background: false,
        }
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

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
    fn endpoint_includes_key_and_sse_alt() {
        let provider = GoogleGeminiProvider::new(Arc::new(UnusedTransport), "K");
        assert_eq!(
            provider.endpoint("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?key=K&alt=sse"
        );
    }
}
