use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::error::LLMError;
use crate::media::DynMediaAdapter;
use crate::types::{
    AttachmentKind, GenerationRequest, Message, Role, Tool, ToolResultContent,
};

/// Anthropic rejects PDF documents above this size.
const MAX_DOCUMENT_BYTES: usize = 32 * 1024 * 1024;
/// Extended thinking requires at least this budget.
const MIN_THINKING_BUDGET: u32 = 1024;

/// Builds the `/v1/messages` request body.
///
/// `{system, developer}` turns fold into the top-level `system` field;
/// `{user, tool}` turns collapse to the `user` role.
pub(crate) async fn build_anthropic_body(
    request: &GenerationRequest,
    model: &str,
    stream: bool,
    media: &DynMediaAdapter,
) -> Result<Value, LLMError> {
    let max_tokens = request.max_tokens.ok_or_else(|| {
        LLMError::invalid_request("Anthropic Messages requires max_tokens")
    })?;

    let mut system_texts = Vec::new();
    if let Some(prompt) = &request.system_prompt {
        system_texts.push(prompt.clone());
    }

    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System | Role::Developer => {
                if let Some(text) = &message.content {
                    system_texts.push(text.clone());
                }
            }
            _ => messages.push(convert_message(message, media).await?),
        }
    }

    if messages.is_empty() {
        return Err(LLMError::invalid_request(
            "Anthropic Messages request requires at least one user/assistant message",
        ));
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
        "stream": stream,
    });
    let obj = body.as_object_mut().expect("body is an object");

    if !system_texts.is_empty() {
        obj.insert("system".to_string(), json!(system_texts.join("\n\n")));
    }

    let mut temperature = request.temperature;
    if let Some(reasoning) = &request.config.reasoning {
        if let Some(budget) = reasoning.budget_tokens {
            let budget = budget.max(MIN_THINKING_BUDGET).min(max_tokens.saturating_sub(1));
            obj.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
            // Extended thinking constrains sampling.
            temperature = Some(1.0);
        }
    }
    if let Some(temperature) = temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }

    if !request.tools.is_empty() {
        obj.insert("tools".to_string(), json!(convert_tools(&request.tools)));
    }

    for (key, value) in &request.config.extra {
        obj.insert(key.clone(), value.clone());
    }

    Ok(body)
}

async fn convert_message(message: &Message, media: &DynMediaAdapter) -> Result<Value, LLMError> {
    let role = match message.role {
        Role::Assistant => "assistant",
        // user and tool turns both travel as user content.
        _ => "user",
    };

    let mut blocks = Vec::new();
    if let Some(text) = &message.content {
        if !text.is_empty() {
            blocks.push(json!({ "type": "text", "text": text }));
        }
    }

    for attachment in &message.attachments {
        blocks.push(convert_attachment(&attachment.kind, media).await?);
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            let input: serde_json::Map<String, Value> = call
                .arguments()
                .into_iter()
                .map(|(key, value)| (key, value.to_json()))
                .collect();
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": input,
            }));
        }
    }

    if let Some(results) = &message.tool_results {
        for result in results {
            blocks.push(json!({
                "type": "tool_result",
                "tool_use_id": result.id,
                "content": convert_result_content(&result.content)?,
                "is_error": result.is_error,
            }));
        }
    }

    if blocks.is_empty() {
        return Err(LLMError::invalid_request(
            "message must contain text, attachments, tool calls, or tool results",
        ));
    }

    Ok(json!({ "role": role, "content": blocks }))
}

async fn convert_attachment(
    kind: &AttachmentKind,
    media: &DynMediaAdapter,
) -> Result<Value, LLMError> {
    match kind {
        AttachmentKind::Image { data, mime_type } => {
            let (bytes, mime_type) = media
                .resize_image_if_needed(data.clone(), mime_type.clone())
                .await?;
            Ok(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": mime_type,
                    "data": BASE64.encode(bytes),
                }
            }))
        }
        AttachmentKind::Document { data, mime_type } => {
            if data.len() > MAX_DOCUMENT_BYTES {
                return Err(LLMError::invalid_request(format!(
                    "document of {} bytes exceeds the 32 MiB Anthropic limit",
                    data.len()
                )));
            }
            Ok(json!({
                "type": "document",
                "source": {
                    "type": "base64",
                    "media_type": mime_type,
                    "data": BASE64.encode(data),
                }
            }))
        }
        AttachmentKind::Video { .. } => Err(LLMError::invalid_request(
            "Anthropic Messages does not accept video attachments",
        )),
        AttachmentKind::Audio { .. } => Err(LLMError::invalid_request(
            "Anthropic Messages does not accept audio attachments",
        )),
    }
}

fn convert_result_content(content: &[ToolResultContent]) -> Result<Vec<Value>, LLMError> {
    let mut items = Vec::new();
    for item in content {
        match item {
            ToolResultContent::Text { text } => {
                items.push(json!({ "type": "text", "text": text }));
            }
            ToolResultContent::Image { data, mime_type } => {
                items.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": mime_type.clone().unwrap_or_else(|| "image/png".to_string()),
                        "data": BASE64.encode(data),
                    }
                }));
            }
            ToolResultContent::Audio { .. } | ToolResultContent::File { .. } => {
                return Err(LLMError::invalid_request(
                    "Anthropic tool results accept only text and image content",
                ));
            }
        }
    }
    Ok(items)
}

/// Anthropic accepts tool schemas natively; no transform is applied.
fn convert_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut def = serde_json::Map::new();
            def.insert("name".to_string(), json!(tool.name));
            def.insert("description".to_string(), json!(tool.description));
            def.insert("input_schema".to_string(), tool.raw_input_schema.clone());
            Value::Object(def)
        })
        .collect()
}

/// Builds the request headers, including optional comma-separated beta flags.
pub(crate) fn build_headers(
    api_key: &str,
    version: &str,
    beta_features: &[String],
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("x-api-key".to_string(), api_key.to_string());
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert("anthropic-version".to_string(), version.to_string());
    if !beta_features.is_empty() {
        headers.insert("anthropic-beta".to_string(), beta_features.join(","));
    }
    headers
}
