use serde::Deserialize;

use crate::error::LLMError;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Maps a non-2xx Responses API response to an [`LLMError`].
pub(crate) fn parse_responses_error(status: u16, body: &str) -> LLMError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => match envelope.error.kind {
            Some(kind) if !kind.is_empty() => format!("{kind}: {}", envelope.error.message),
            _ => envelope.error.message,
        },
        _ => body.trim().to_string(),
    };
    LLMError::from_status(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_through_shared_taxonomy() {
        let err = parse_responses_error(400, r#"{"error":{"message":"bad input"}}"#);
        assert!(matches!(err, LLMError::InvalidRequest { .. }));
    }
}
