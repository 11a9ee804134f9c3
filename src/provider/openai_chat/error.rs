use crate::error::LLMError;

use super::types::OpenAiErrorEnvelope;

/// Maps a non-2xx Chat Completions response to an [`LLMError`].
pub(crate) fn parse_openai_error(status: u16, body: &str) -> LLMError {
    let message = match serde_json::from_str::<OpenAiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => match envelope.error.kind {
            Some(kind) if !kind.is_empty() => format!("{kind}: {}", envelope.error.message),
            _ => envelope.error.message,
        },
        _ => body.trim().to_string(),
    };
    LLMError::from_status(status, message)
}
