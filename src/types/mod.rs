//! Provider-neutral data model for conversations, tools, and responses.
//!
//! These types normalize provider-specific payloads so the rest of the crate
//! can stay agnostic of individual API differences. A [`Message`] is
//! immutable once appended to a conversation; a streaming turn accumulates
//! into successive [`GenerationResponse`] snapshots.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::value::Value;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// One conversation turn.
///
/// `tool_calls` is populated only on assistant messages that invoked tools;
/// `tool_results` only on tool-role turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Plain text content, absent on pure tool-result turns.
    pub content: Option<String>,
    /// Multimodal attachments delivered alongside the text.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Tool invocations the assistant issued on this turn.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Results answering a previous assistant turn's tool calls.
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    /// Creates a user turn with plain text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Creates a system turn with plain text content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Creates an assistant turn with plain text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            attachments: Vec::new(),
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Creates an assistant turn carrying tool invocations, as replayed into
    /// the conversation history after a tool-use response.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            attachments: Vec::new(),
            tool_calls: Some(calls),
            tool_results: None,
        }
    }

    /// Creates a tool-role turn answering earlier tool calls.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: None,
            attachments: Vec::new(),
            tool_calls: None,
            tool_results: Some(results),
        }
    }

    /// Attaches a multimodal payload to this turn.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Multimodal attachment on a message.
///
/// The semantic category matters because providers handle each differently
/// (inline base64 vs upload-then-reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub filename: Option<String>,
}

impl Attachment {
    pub fn image(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image {
                data,
                mime_type: mime_type.into(),
            },
            filename: None,
        }
    }

    pub fn document(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Document {
                data,
                mime_type: mime_type.into(),
            },
            filename: None,
        }
    }

    pub fn video(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Video {
                data,
                mime_type: mime_type.into(),
            },
            filename: None,
        }
    }

    pub fn audio(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Audio {
                data,
                mime_type: mime_type.into(),
            },
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Returns the raw payload and MIME type regardless of category.
    pub fn payload(&self) -> (&[u8], &str) {
        match &self.kind {
            AttachmentKind::Image { data, mime_type }
            | AttachmentKind::Document { data, mime_type }
            | AttachmentKind::Video { data, mime_type }
            | AttachmentKind::Audio { data, mime_type } => (data, mime_type),
        }
    }
}

/// Attachment category with its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachmentKind {
    Image { data: Vec<u8>, mime_type: String },
    Document { data: Vec<u8>, mime_type: String },
    Video { data: Vec<u8>, mime_type: String },
    Audio { data: Vec<u8>, mime_type: String },
}

/// Bare content category used for static capability matching between a
/// tool's declared output kinds and what a client can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Image,
    Audio,
    File,
}

/// One piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text {
        text: String,
    },
    Image {
        data: Vec<u8>,
        mime_type: Option<String>,
    },
    Audio {
        data: Vec<u8>,
        mime_type: String,
    },
    File {
        data: Vec<u8>,
        mime_type: String,
        filename: Option<String>,
    },
}

impl ToolResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the bare category of this content item.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Text { .. } => ValueType::Text,
            Self::Image { .. } => ValueType::Image,
            Self::Audio { .. } => ValueType::Audio,
            Self::File { .. } => ValueType::File,
        }
    }
}

/// Result returned by a tool execution step.
///
/// `id` equals the [`ToolCall::id`] it answers; mismatches are forwarded to
/// the provider verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub id: String,
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Builds an error-tagged result carrying `message` as its single text
    /// content item.
    pub fn error(
        name: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            content: vec![ToolResultContent::text(message)],
            is_error: true,
        }
    }
}

/// Tool invocation emitted inside a generation response.
///
/// `id` uniquely identifies the invocation within a single turn and is the
/// correlation key for its later [`ToolResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub id: String,
    /// Parsed arguments. May grow while a stream is in flight; internal
    /// bookkeeping keys (prefixed with `_`) are stripped by
    /// [`ToolCall::arguments`].
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Provider-specific metadata that must be echoed back on the follow-up
    /// turn, e.g. Gemini's `thoughtSignature`.
    pub provider_metadata: Option<BTreeMap<String, Value>>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            parameters: BTreeMap::new(),
            provider_metadata: None,
        }
    }

    /// Returns the caller-visible arguments, with internal keys stripped.
    pub fn arguments(&self) -> BTreeMap<String, Value> {
        crate::value::strip_internal(&self.parameters)
    }
}

/// Parameter type used for generated JSON schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Int,
    Float,
    Bool,
    Array(Box<ParameterKind>),
    Object,
}

impl ParameterKind {
    fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
            Self::Array(_) => "array",
            Self::Object => "object",
        }
    }
}

/// Declarative tool parameter from which a JSON schema can be generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl Parameter {
    /// Creates a required parameter with the given name and type.
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            kind,
            required: true,
            enum_values: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the parameter to a fixed set of string values.
    pub fn choices<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Constrains string length.
    pub fn min_max_length(mut self, min: u64, max: u64) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    /// Constrains numeric range.
    pub fn bounded(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    fn to_schema(&self) -> serde_json::Value {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!(self.kind.json_type()));
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), json!(description));
        }
        if let Some(title) = &self.title {
            schema.insert("title".to_string(), json!(title));
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".to_string(), json!(values));
        }
        if let Some(min) = self.min_length {
            schema.insert("minLength".to_string(), json!(min));
        }
        if let Some(max) = self.max_length {
            schema.insert("maxLength".to_string(), json!(max));
        }
        if let Some(min) = self.minimum {
            schema.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = self.maximum {
            schema.insert("maximum".to_string(), json!(max));
        }
        if let ParameterKind::Array(item) = &self.kind {
            schema.insert("items".to_string(), json!({ "type": item.json_type() }));
        }
        serde_json::Value::Object(schema)
    }
}

/// Future type returned by tool executors.
pub type ToolFuture =
    Pin<Box<dyn Future<Output = Result<Vec<ToolResultContent>, LLMError>> + Send>>;

/// Async executor invoked when a tool call is dispatched.
pub type ToolExecutor = Arc<dyn Fn(BTreeMap<String, Value>) -> ToolFuture + Send + Sync>;

/// Declarative definition of a tool available to the assistant.
///
/// `raw_input_schema` is always populated: either supplied directly or
/// generated from `parameters`. `parameters` may be empty when the schema was
/// supplied directly.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub raw_input_schema: serde_json::Value,
    /// Declared output kinds, used to filter tools against client rendering
    /// capability. `None` means text-only.
    pub result_types: Option<Vec<ValueType>>,
    executor: ToolExecutor,
}

impl Tool {
    /// Creates a tool whose schema is generated from a parameter list.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashi::types::{Parameter, ParameterKind, Tool, ToolResultContent};
    ///
    /// let tool = Tool::new(
    ///     "get_weather",
    ///     "Look up current weather for a location",
    ///     vec![Parameter::new("location", ParameterKind::String)],
    ///     |args| {
    ///         Box::pin(async move {
    ///             let location = args
    ///                 .get("location")
    ///                 .and_then(|v| v.as_str())
    ///                 .unwrap_or("unknown")
    ///                 .to_string();
    ///             Ok(vec![ToolResultContent::text(format!("sunny in {location}"))])
    ///         })
    ///     },
    /// );
    /// assert_eq!(tool.raw_input_schema["type"], "object");
    /// assert_eq!(tool.raw_input_schema["required"][0], "location");
    /// ```
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<Parameter>,
        executor: F,
    ) -> Self
    where
        F: Fn(BTreeMap<String, Value>) -> ToolFuture + Send + Sync + 'static,
    {
        let raw_input_schema = schema_from_parameters(&parameters);
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            parameters,
            raw_input_schema,
            result_types: None,
            executor: Arc::new(executor),
        }
    }

    /// Creates a tool from a caller-supplied JSON schema.
    pub fn with_schema<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        raw_input_schema: serde_json::Value,
        executor: F,
    ) -> Self
    where
        F: Fn(BTreeMap<String, Value>) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            parameters: Vec::new(),
            raw_input_schema,
            result_types: None,
            executor: Arc::new(executor),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_result_types(mut self, result_types: Vec<ValueType>) -> Self {
        self.result_types = Some(result_types);
        self
    }

    /// Runs the executor with already-validated arguments.
    ///
    /// # Errors
    ///
    /// Propagates whatever the executor fails with; [`crate::tools::Tools`]
    /// converts such failures into error-tagged results.
    pub async fn execute(
        &self,
        args: BTreeMap<String, Value>,
    ) -> Result<Vec<ToolResultContent>, LLMError> {
        (self.executor)(args).await
    }

    /// Returns `true` when every declared result type is renderable by a
    /// client supporting `client_kinds`.
    pub fn supported_by(&self, client_kinds: &[ValueType]) -> bool {
        match &self.result_types {
            None => true,
            Some(kinds) => kinds.iter().all(|kind| client_kinds.contains(kind)),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("raw_input_schema", &self.raw_input_schema)
            .finish()
    }
}

/// Generates an object schema with typed properties, constraint keywords, and
/// a `required` array from a declarative parameter list.
fn schema_from_parameters(parameters: &[Parameter]) -> serde_json::Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for parameter in parameters {
        properties.insert(parameter.name.clone(), parameter.to_schema());
        if parameter.required {
            required.push(json!(parameter.name));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ToolUse,
    ContentFilter,
    Other,
}

/// Response metadata surfaced with the final snapshot of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub response_id: Option<String>,
    pub model: Option<String>,
    /// Creation time as a Unix timestamp, when the provider reports one.
    pub created_at: Option<i64>,
    pub finish_reason: Option<FinishReason>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
}

/// The three text channels of a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Texts {
    /// Model-internal deliberation surfaced as a distinct channel.
    pub reasoning: Option<String>,
    /// The reply itself.
    pub response: Option<String>,
    /// Auxiliary annotations such as citation lists.
    pub notes: Option<String>,
}

/// Accumulated (possibly partial) result of one generation turn.
///
/// Within one streamed turn, `texts.response` and `texts.reasoning` are
/// monotonically non-shrinking across yields, the tool-call list only grows,
/// and a given call's parameters never lose previously-published
/// non-internal keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub texts: Texts,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub metadata: Option<Metadata>,
}

impl GenerationResponse {
    /// Returns the response text, or an empty string when none arrived yet.
    pub fn response_text(&self) -> &str {
        self.texts.response.as_deref().unwrap_or_default()
    }
}

/// Reasoning effort preset for providers with discrete levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Thinking/reasoning controls, interpreted per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Token budget (Anthropic `budget_tokens`, Gemini 2.5 `thinkingBudget`).
    pub budget_tokens: Option<u32>,
    /// Discrete level (Gemini 3 `thinkingLevel`).
    pub level: Option<ReasoningLevel>,
}

/// Per-request configuration beyond the sampling basics.
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub reasoning: Option<ReasoningConfig>,
    /// Apply the strict-mode schema transform on OpenAI surfaces.
    pub strict_tools: bool,
    /// Provider beta feature flags (Anthropic `anthropic-beta`).
    pub beta_features: Vec<String>,
    /// Per-request timeout override; providers apply their own defaults.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation for the turn. A cancelled stream completes
    /// cleanly with the last assembled snapshot; it does not raise.
    pub cancellation: Option<CancellationToken>,
    /// Provider-specific body fields forwarded verbatim.
    pub extra: HashMap<String, serde_json::Value>,
}

/// Provider-neutral generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Model identifier; falls back to the provider's default model.
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub config: GenerationConfig,
}

impl GenerationRequest {
    /// Creates a request holding a single user message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Self::default()
        }
    }
}

/// Capability descriptor used to filter providers at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityDescriptor {
    pub supports_stream: bool,
    pub supports_image_input: bool,
    pub supports_audio_input: bool,
    pub supports_video_input: bool,
    pub supports_document_input: bool,
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub supports_background: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_generation_covers_constraints() {
        let parameters = vec![
            Parameter::new("query", ParameterKind::String)
                .with_description("Search query")
                .min_max_length(2, 64),
            Parameter::new("limit", ParameterKind::Int).optional().bounded(1.0, 50.0),
            Parameter::new("mode", ParameterKind::String).choices(["fast", "deep"]),
            Parameter::new("tags", ParameterKind::Array(Box::new(ParameterKind::String)))
                .optional(),
        ];
        let tool = Tool::new("search", "Search things", parameters, |_| {
            Box::pin(async { Ok(vec![ToolResultContent::text("ok")]) })
        });

        let schema = &tool.raw_input_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["query"]["minLength"], 2);
        assert_eq!(schema["properties"]["query"]["maxLength"], 64);
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["properties"]["limit"]["minimum"], 1.0);
        assert_eq!(schema["properties"]["limit"]["maximum"], 50.0);
        assert_eq!(schema["properties"]["mode"]["enum"][0], "fast");
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");
        let required = schema["required"].as_array().expect("required array");
        let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(names, vec!["query", "mode"]);
    }

    #[test]
    fn tool_call_arguments_strip_internal_keys() {
        let mut call = ToolCall::new("f", "c1");
        call.parameters
            .insert("x".to_string(), Value::Int(1));
        call.parameters
            .insert(Value::JSON_BUFFER_KEY.to_string(), Value::from("{\"x\":1"));
        let args = call.arguments();
        assert_eq!(args.len(), 1);
        assert_eq!(args["x"], Value::Int(1));
    }

    #[test]
    fn capability_filter_defaults_to_text() {
        let tool = Tool::new("t", "d", Vec::new(), |_| {
            Box::pin(async { Ok(Vec::new()) })
        });
        assert!(tool.supported_by(&[ValueType::Text]));

        let media = tool.with_result_types(vec![ValueType::Image, ValueType::Text]);
        assert!(!media.supported_by(&[ValueType::Text]));
        assert!(media.supported_by(&[ValueType::Text, ValueType::Image]));
    }
}
