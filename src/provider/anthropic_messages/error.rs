use crate::error::LLMError;

use super::types::AnthropicErrorEnvelope;

/// Maps a non-2xx Messages API response to an [`LLMError`].
///
/// The body is decoded as the standard `{"error": {"type", "message"}}`
/// envelope when possible; otherwise the raw text is carried verbatim.
pub(crate) fn parse_anthropic_error(status: u16, body: &str) -> LLMError {
    let message = match serde_json::from_str::<AnthropicErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            if envelope.error.kind.is_empty() {
                envelope.error.message
            } else {
                format!("{}: {}", envelope.error.kind, envelope.error.message)
            }
        }
        _ => body.trim().to_string(),
    };
    LLMError::from_status(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_error_envelope() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = parse_anthropic_error(401, body);
        match err {
            LLMError::Authentication { message } => {
                assert!(message.contains("invalid x-api-key"));
                assert!(message.contains("authentication_error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_raw_body() {
        let err = parse_anthropic_error(500, "upstream exploded");
        match err {
            LLMError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
