use std::time::Duration;

use thiserror::Error;

/// Bounds the JSON excerpt embedded in parsing errors.
const PARSE_EXCERPT_LIMIT: usize = 256;

/// Aggregates every failure mode exposed by the unified LLM client.
///
/// Callers can match on the specific variant to decide whether to retry, fall
/// back to another provider, or surface an actionable message to the user
/// interface. [`LLMError::is_retryable`] encodes the standard policy.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Transport-layer or networking failure.
    #[error("network error: {message}")]
    Network { message: String },
    /// Invalid or missing credentials (HTTP 401/403).
    #[error("authentication failure: {message}")]
    Authentication { message: String },
    /// The provider throttled the request (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Upstream 5xx or otherwise unclassified server-side failure.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// The request payload was rejected before or by the provider (HTTP 400).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    /// A response or stream event could not be decoded.
    #[error("parse error: {message}")]
    Parsing { message: String },
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The request or gateway timed out.
    #[error("timeout: {message}")]
    Timeout { message: String },
}

impl LLMError {
    /// Creates an [`LLMError::Network`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::error::LLMError;
    ///
    /// let err = LLMError::network("dns lookup failed");
    /// assert!(matches!(err, LLMError::Network { .. }));
    /// ```
    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::InvalidRequest`] from a textual description.
    pub fn invalid_request<T: Into<String>>(message: T) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Parsing`] error, embedding a bounded excerpt of
    /// the offending payload for diagnostics.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::error::LLMError;
    ///
    /// let err = LLMError::parsing("unexpected token", "{\"broken\":");
    /// assert!(err.to_string().contains("{\"broken\":"));
    /// ```
    pub fn parsing<T: Into<String>>(message: T, payload: &str) -> Self {
        let excerpt: String = payload.chars().take(PARSE_EXCERPT_LIMIT).collect();
        Self::Parsing {
            message: if excerpt.is_empty() {
                message.into()
            } else {
                format!("{}: {excerpt}", message.into())
            },
        }
    }

    /// Creates an [`LLMError::Timeout`] from a textual description.
    pub fn timeout<T: Into<String>>(message: T) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Maps an HTTP status to the corresponding error kind.
    ///
    /// The mapping is total: 400 → [`LLMError::InvalidRequest`], 401/403 →
    /// [`LLMError::Authentication`], 429 → [`LLMError::RateLimit`], 504 →
    /// [`LLMError::Timeout`], any other 5xx (and anything unclassified) →
    /// [`LLMError::Server`].
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::error::LLMError;
    ///
    /// assert!(matches!(LLMError::from_status(400, "bad"), LLMError::InvalidRequest { .. }));
    /// assert!(matches!(LLMError::from_status(401, "no"), LLMError::Authentication { .. }));
    /// assert!(matches!(LLMError::from_status(429, "slow"), LLMError::RateLimit { .. }));
    /// assert!(matches!(LLMError::from_status(503, "down"), LLMError::Server { status: 503, .. }));
    /// ```
    pub fn from_status<T: Into<String>>(status: u16, message: T) -> Self {
        let message = message.into();
        match status {
            400 => Self::InvalidRequest { message },
            401 | 403 => Self::Authentication { message },
            429 => Self::RateLimit {
                message,
                retry_after: None,
            },
            504 => Self::Timeout { message },
            _ => Self::Server { status, message },
        }
    }

    /// Like [`LLMError::from_status`], threading a parsed `Retry-After` hint
    /// into rate-limit errors.
    pub fn from_status_with_retry_after<T: Into<String>>(
        status: u16,
        message: T,
        retry_after: Option<Duration>,
    ) -> Self {
        match Self::from_status(status, message) {
            Self::RateLimit { message, .. } => Self::RateLimit {
                message,
                retry_after,
            },
            other => other,
        }
    }

    /// Returns `true` when the standard policy retries this error.
    ///
    /// Retryable kinds are rate limits, server errors, network failures, and
    /// timeouts. Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. }
                | Self::Server { .. }
                | Self::Network { .. }
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total_and_stable() {
        assert!(matches!(
            LLMError::from_status(400, "x"),
            LLMError::InvalidRequest { .. }
        ));
        assert!(matches!(
            LLMError::from_status(401, "x"),
            LLMError::Authentication { .. }
        ));
        assert!(matches!(
            LLMError::from_status(403, "x"),
            LLMError::Authentication { .. }
        ));
        assert!(matches!(
            LLMError::from_status(429, "x"),
            LLMError::RateLimit { .. }
        ));
        assert!(matches!(
            LLMError::from_status(504, "x"),
            LLMError::Timeout { .. }
        ));
        for status in [500u16, 502, 503, 599] {
            assert!(matches!(
                LLMError::from_status(status, "x"),
                LLMError::Server { .. }
            ));
        }
        // Unclassified statuses fall through to Server.
        assert!(matches!(
            LLMError::from_status(418, "x"),
            LLMError::Server { status: 418, .. }
        ));
    }

    #[test]
    fn retryable_kinds_match_policy() {
        assert!(LLMError::network("boom").is_retryable());
        assert!(LLMError::timeout("slow").is_retryable());
        assert!(LLMError::from_status(429, "x").is_retryable());
        assert!(LLMError::from_status(500, "x").is_retryable());
        assert!(!LLMError::from_status(400, "x").is_retryable());
        assert!(!LLMError::from_status(401, "x").is_retryable());
        assert!(!LLMError::Cancelled.is_retryable());
        assert!(!LLMError::parsing("bad", "{").is_retryable());
    }

    #[test]
    fn parsing_error_bounds_payload_excerpt() {
        let long = "x".repeat(1000);
        let err = LLMError::parsing("bad json", &long);
        let text = err.to_string();
        assert!(text.len() < 400, "excerpt should be bounded: {}", text.len());
    }

    #[test]
    fn retry_after_hint_survives_mapping() {
        let err = LLMError::from_status_with_retry_after(
            429,
            "slow down",
            Some(Duration::from_secs(3)),
        );
        match err {
            LLMError::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
