use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::LLMError;

/// Enumerates HTTP methods understood by the lightweight transport abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Builds a bodyless GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Builds a bodyless HEAD request, used for redirect resolution.
    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Head,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Builds a bodyless DELETE request.
    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Replaces the request headers after construction.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a raw (non-JSON) body, as needed by resumable uploads.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// URL the request resolved to after redirects, when the transport
    /// tracks it. Used for grounding-link resolution.
    pub final_url: Option<String>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Parsing`] when the body is not valid UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::Parsing {
            message: format!("response body is not UTF-8: {err}"),
        })
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// Providers only ever issue "request → (status, bytes)" and
/// "request → (status, byte stream)" operations through this trait, which is
/// what lets tests drive the full streaming pipeline from in-memory fixtures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Errors
    ///
    /// Implementations should map transport failures to [`LLMError::Network`]
    /// and timeouts to [`LLMError::Timeout`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns a streaming body.
    ///
    /// # Errors
    ///
    /// Implementations should map transport failures to [`LLMError::Network`]
    /// and timeouts to [`LLMError::Timeout`].
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes a body to JSON, attaches headers, and issues a POST request.
///
/// # Errors
///
/// Returns [`LLMError::InvalidRequest`] if serialization fails or forwards the
/// error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, LLMError> {
    let payload = serde_json::to_vec(body).map_err(|err| LLMError::InvalidRequest {
        message: format!("failed to serialize request: {err}"),
    })?;
    let mut request = HttpRequest::post_json(url, payload).with_headers(headers);
    request.timeout = timeout;
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// Mirrors [`post_json_with_headers`] but calls [`HttpTransport::send_stream`]
/// to support Server-Sent Events.
///
/// # Errors
///
/// Returns [`LLMError::InvalidRequest`] when serialization fails or propagates
/// any error from [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpStreamResponse, LLMError> {
    let payload = serde_json::to_vec(body).map_err(|err| LLMError::InvalidRequest {
        message: format!("failed to serialize request: {err}"),
    })?;
    let mut request = HttpRequest::post_json(url, payload).with_headers(headers);
    request.timeout = timeout;
    transport.send_stream(request).await
}

pub mod reqwest;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser;

    /// Transport that panics if `send` or `send_stream` are invoked, ensuring
    /// serialization failures are surfaced before any network activity.
    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("send should not be called");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("send_stream should not be called");
        }
    }

    struct NonSerializableBody;

    impl Serialize for NonSerializableBody {
        fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            Err(ser::Error::custom(
                "intentional serialization failure for test",
            ))
        }
    }

    #[tokio::test]
    async fn post_json_with_headers_rejects_unserializable_body() {
        let transport = PanicTransport;
        let result = post_json_with_headers(
            &transport,
            "http://example.com",
            HashMap::new(),
            &NonSerializableBody,
            None,
        )
        .await;

        match result {
            Err(LLMError::InvalidRequest { message }) => {
                assert!(
                    message.contains("failed to serialize request"),
                    "unexpected message: {message}"
                );
            }
            Ok(_) => panic!("expected invalid-request error for non-serializable body"),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::from([("Retry-After".to_string(), "3".to_string())]),
            body: Vec::new(),
            final_url: None,
        };
        assert_eq!(response.header("retry-after"), Some("3"));
        assert_eq!(response.header("missing"), None);
    }
}
