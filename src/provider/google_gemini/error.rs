use crate::error::LLMError;

use super::types::GeminiErrorEnvelope;

/// Maps a non-2xx Gemini response to an [`LLMError`].
pub(crate) fn parse_gemini_error(status: u16, body: &str) -> LLMError {
    let message = match serde_json::from_str::<GeminiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => match envelope.error.status {
            Some(code) if !code.is_empty() => format!("{code}: {}", envelope.error.message),
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
    fn decodes_google_error_envelope() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = parse_gemini_error(400, body);
        match err {
            LLMError::InvalidRequest { message } => {
                assert!(message.contains("INVALID_ARGUMENT"));
                assert!(message.contains("API key not valid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
