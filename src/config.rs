use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative description of one callable backend.
///
/// Used by applications that load provider wiring from configuration files
/// instead of constructing providers in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Caller-chosen handle, e.g. `default-anthropic`.
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    pub default_model: Option<String>,
    pub base_url: Option<String>,
    /// Additional provider-specific settings, e.g. `version` or `beta` for
    /// Anthropic.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Supported provider families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    OpenAiResponses,
    AnthropicMessages,
    GoogleGemini,
}

/// Credential material attached to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Plain API key, sent in the provider's native key header or query field.
    ApiKey { key: String },
    /// Bearer token for `Authorization: Bearer` providers.
    Bearer { token: String },
    /// Local or proxy providers that need no credential.
    None,
}

impl Credential {
    /// Extracts the secret regardless of transport style, or `None` for
    /// credential-less configurations.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::ApiKey { key } => Some(key),
            Self::Bearer { token } => Some(token),
            Self::None => None,
        }
    }
}
