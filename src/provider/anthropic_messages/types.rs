use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Non-streaming Messages API response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    /// Some compatibility layers omit the id.
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

/// One content block, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContentBlock {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        citations: Option<Vec<Value>>,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking,
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ServerToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    WebSearchToolResult,
    WebFetchToolResult,
    CodeExecutionToolResult {
        #[serde(default, deserialize_with = "one_or_many")]
        content: Vec<CodeExecutionContent>,
    },
    Image,
    Document,
    #[serde(other)]
    Unknown,
}

/// Items inside a `code_execution_tool_result` content array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum CodeExecutionContent {
    CodeExecutionResult {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        return_code: Option<i64>,
    },
    CodeExecutionToolResultError {
        #[serde(default)]
        error_code: Option<String>,
    },
    CodeExecutionOutput {
        file_id: String,
    },
    #[serde(other)]
    Unknown,
}

/// The API sometimes sends a single object where a list is documented.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CodeExecutionContent>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<CodeExecutionContent>),
        One(CodeExecutionContent),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

/// Streaming event, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessageStart,
    },
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
    ContentBlockStart {
        index: usize,
        content_block: AnthropicContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: AnthropicContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: AnthropicMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    #[serde(other)]
    Unknown,
}

/// Snapshot carried by `message_start`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageStart {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

/// Per-block delta, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContentDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    CitationsDelta {
        citation: Value,
    },
    SignatureDelta {
        signature: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

/// Message-level delta carried by `message_delta`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AnthropicMessageDelta {
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

/// Error payload inside an `error` stream event or error response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicErrorBody {
    #[serde(default, rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) message: String,
}

/// Token accounting.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) cache_read_input_tokens: Option<u64>,
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicErrorEnvelope {
    pub(crate) error: AnthropicErrorBody,
}

