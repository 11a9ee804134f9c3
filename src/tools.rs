//! Tool catalogue with validated, concurrent dispatch.
//!
//! Dispatch never fails: unknown names, schema violations, and executor
//! errors all come back as error-tagged [`ToolResult`]s so a conversation
//! loop can always forward something to the provider.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::LLMError;
use crate::types::{Tool, ToolCall, ToolResult, ValueType};

tokio::task_local! {
    static CURRENT_TOOL_CALL_ID: String;
}

/// Returns the tool-call id bound to the current task, if any.
///
/// Tool executors and anything they call can use this to correlate progress
/// events with the invocation that triggered them.
pub fn current_tool_call_id() -> Option<String> {
    CURRENT_TOOL_CALL_ID.try_with(Clone::clone).ok()
}

/// Validates tool-call arguments against a tool's input schema.
///
/// Injectable so tests and embedders can substitute their own validation;
/// the default is [`JsonSchemaValidator`].
pub trait SchemaValidator: Send + Sync {
    /// Returns `Err(message)` describing the first violation, if any.
    fn validate(&self, schema: &serde_json::Value, args: &serde_json::Value)
    -> Result<(), String>;
}

/// Default validator backed by the `jsonschema` crate.
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(
        &self,
        schema: &serde_json::Value,
        args: &serde_json::Value,
    ) -> Result<(), String> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| format!("invalid tool schema: {err}"))?;
        match validator.validate(args) {
            Ok(()) => Ok(()),
            Err(err) => Err(err.to_string()),
        }
    }
}

/// Name-indexed tool catalogue.
pub struct Tools {
    tools: HashMap<String, Arc<Tool>>,
    validator: Arc<dyn SchemaValidator>,
}

impl Tools {
    /// Creates a catalogue with the default JSON-Schema validator.
    pub fn new(tools: Vec<Tool>) -> Result<Self, LLMError> {
        Self::with_validator(tools, Arc::new(JsonSchemaValidator))
    }

    /// Creates a catalogue with a caller-supplied validator.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] when two tools share a name.
    pub fn with_validator(
        tools: Vec<Tool>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Result<Self, LLMError> {
        let mut map = HashMap::new();
        for tool in tools {
            let name = tool.name.clone();
            if map.insert(name.clone(), Arc::new(tool)).is_some() {
                return Err(LLMError::invalid_request(format!(
                    "duplicate tool name: {name}"
                )));
            }
        }
        Ok(Self {
            tools: map,
            validator,
        })
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.get(name)
    }

    /// Returns the registered tools, for request building.
    pub fn definitions(&self) -> Vec<Arc<Tool>> {
        self.tools.values().cloned().collect()
    }

    /// Returns the tools whose declared result types a client supporting
    /// `client_kinds` can render.
    pub fn supported_by(&self, client_kinds: &[ValueType]) -> Vec<Arc<Tool>> {
        self.tools
            .values()
            .filter(|tool| tool.supported_by(client_kinds))
            .cloned()
            .collect()
    }

    /// Dispatches a single tool call.
    ///
    /// Resolution, validation, and execution failures are all captured into
    /// an error-tagged [`ToolResult`]; this method never errors.
    pub async fn call(&self, call: &ToolCall) -> ToolResult {
        dispatch(
            self.tools.get(&call.name).cloned(),
            Arc::clone(&self.validator),
            call.clone(),
        )
        .await
    }

    /// Dispatches many calls concurrently, one task per call, returning
    /// results in input order regardless of completion order.
    ///
    /// Executors must be thread-safe; the dispatcher neither serialises nor
    /// deduplicates calls.
    pub async fn call_many(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                tokio::spawn(dispatch(
                    self.tools.get(&call.name).cloned(),
                    Arc::clone(&self.validator),
                    call.clone(),
                ))
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (handle, call) in handles.into_iter().zip(calls) {
            match handle.await {
                Ok(result) => results.push(result),
                // A panicking executor still produces an error-tagged slot so
                // positional correspondence holds.
                Err(join_err) => {
                    debug!("tool task join error: {join_err}");
                    results.push(ToolResult::error(
                        call.name.clone(),
                        call.id.clone(),
                        "tool execution panicked",
                    ));
                }
            }
        }
        results
    }
}

async fn dispatch(
    tool: Option<Arc<Tool>>,
    validator: Arc<dyn SchemaValidator>,
    call: ToolCall,
) -> ToolResult {
    let Some(tool) = tool else {
        return ToolResult::error(
            call.name.clone(),
            call.id.clone(),
            format!("unknown tool: {}", call.name),
        );
    };

    let args = call.arguments();
    let host_args = serde_json::Value::Object(
        args.iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    );
    if let Err(message) = validator.validate(&tool.raw_input_schema, &host_args) {
        return ToolResult::error(
            call.name.clone(),
            call.id.clone(),
            format!("invalid arguments: {message}"),
        );
    }

    debug!(tool = %call.name, id = %call.id, "dispatching tool call");
    let executed = CURRENT_TOOL_CALL_ID
        .scope(call.id.clone(), async move { tool.execute(args).await })
        .await;
    match executed {
        Ok(content) => ToolResult {
            name: call.name,
            id: call.id,
            content,
            is_error: false,
        },
        Err(err) => ToolResult::error(call.name.clone(), call.id.clone(), err.to_string()),
    }
}
