use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::media::DynMediaAdapter;
use crate::types::{AttachmentKind, GenerationRequest, Message, Role, Tool, ToolResultContent};

use super::upload::upload_file;

/// Attachments at or above this size go through the File API instead of
/// being inlined.
pub(crate) const INLINE_LIMIT_BYTES: usize = 20 * 1024 * 1024;

/// Builds the `streamGenerateContent` request body.
///
/// Roles are renamed (`assistant` → `model`, `tool` → `function`);
/// `{system, developer}` turns fold into `systemInstruction`; any
/// `thoughtSignature` captured on an earlier function call is echoed on its
/// history part.
pub(crate) async fn build_gemini_body(
    request: &GenerationRequest,
    transport: &DynHttpTransport,
    media: &DynMediaAdapter,
    base_url: &str,
    api_key: &str,
) -> Result<Value, LLMError> {
    let mut system_texts = Vec::new();
    if let Some(prompt) = &request.system_prompt {
        system_texts.push(prompt.clone());
    }

    let mut contents = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System | Role::Developer => {
                if let Some(text) = &message.content {
                    system_texts.push(text.clone());
                }
            }
            _ => contents.push(
                convert_message(message, transport, media, base_url, api_key).await?,
            ),
        }
    }

    if contents.is_empty() {
        return Err(LLMError::invalid_request(
            "Gemini request requires at least one user/model message",
        ));
    }

    let mut body = json!({ "contents": contents });
    let obj = body.as_object_mut().expect("body is an object");

    if !system_texts.is_empty() {
        obj.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_texts.join("\n\n") }] }),
        );
    }

    let mut generation_config = Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    let mut temperature = request.temperature;
    if let Some(reasoning) = &request.config.reasoning {
        if let Some(level) = reasoning.level {
            // Gemini 3 style: discrete levels, and temperature interferes
            // with reasoning, so it is dropped.
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingLevel": level.as_str().to_uppercase() }),
            );
            temperature = None;
        } else if let Some(budget) = reasoning.budget_tokens {
            // Gemini 2.5 style: explicit token budget.
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": budget }),
            );
        }
    }
    if let Some(temperature) = temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if !generation_config.is_empty() {
        obj.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }

    if !request.tools.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": convert_tools(&request.tools) }]),
        );
    }
    for (key, value) in &request.config.extra {
        obj.insert(key.clone(), value.clone());
    }

    Ok(body)
}

async fn convert_message(
    message: &Message,
    transport: &DynHttpTransport,
    media: &DynMediaAdapter,
    base_url: &str,
    api_key: &str,
) -> Result<Value, LLMError> {
    let role = match message.role {
        Role::Assistant => "model",
        Role::Tool => "function",
        _ => "user",
    };

    let mut parts = Vec::new();
    if let Some(text) = &message.content {
        if !text.is_empty() {
            parts.push(json!({ "text": text }));
        }
    }

    for attachment in &message.attachments {
        parts.push(
            convert_attachment(&attachment.kind, transport, media, base_url, api_key).await?,
        );
    }

    for call in message.tool_calls.iter().flatten() {
        let args: Map<String, Value> = call
            .arguments()
            .into_iter()
            .map(|(key, value)| (key, value.to_json()))
            .collect();
        let mut part = Map::new();
        part.insert(
            "functionCall".to_string(),
            json!({ "name": call.name, "args": args }),
        );
        // Dropping the signature can make the server reject the follow-up.
        if let Some(signature) = call
            .provider_metadata
            .as_ref()
            .and_then(|meta| meta.get("thoughtSignature"))
            .and_then(|value| value.as_str())
        {
            part.insert("thoughtSignature".to_string(), json!(signature));
        }
        parts.push(Value::Object(part));
    }

    for result in message.tool_results.iter().flatten() {
        parts.push(json!({
            "functionResponse": {
                "name": result.name,
                "response": { "result": render_result_text(&result.content) },
            }
        }));
    }

    if parts.is_empty() {
        return Err(LLMError::invalid_request(
            "message must contain text, attachments, tool calls, or tool results",
        ));
    }

    Ok(json!({ "role": role, "parts": parts }))
}

async fn convert_attachment(
    kind: &AttachmentKind,
    transport: &DynHttpTransport,
    media: &DynMediaAdapter,
    base_url: &str,
    api_key: &str,
) -> Result<Value, LLMError> {
    let (data, mime_type) = match kind {
        AttachmentKind::Image { data, mime_type } => {
            let (bytes, mime_type) = media
                .resize_image_if_needed(data.clone(), mime_type.clone())
                .await?;
            // Images are always inlined after resizing.
            return Ok(inline_part(&bytes, &mime_type));
        }
        AttachmentKind::Document { data, mime_type }
        | AttachmentKind::Video { data, mime_type }
        | AttachmentKind::Audio { data, mime_type } => (data, mime_type),
    };

    if data.len() < INLINE_LIMIT_BYTES {
        Ok(inline_part(data, mime_type))
    } else {
        let uri = upload_file(transport, base_url, api_key, data, mime_type, "attachment").await?;
        Ok(json!({
            "fileData": { "fileUri": uri, "mimeType": mime_type }
        }))
    }
}

fn inline_part(data: &[u8], mime_type: &str) -> Value {
    json!({
        "inlineData": { "mimeType": mime_type, "data": BASE64.encode(data) }
    })
}

fn render_result_text(content: &[ToolResultContent]) -> String {
    let mut text = String::new();
    for item in content {
        if let ToolResultContent::Text { text: part } = item {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(part);
        }
    }
    text
}

fn convert_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": gemini_schema(&tool.raw_input_schema),
            })
        })
        .collect()
}

/// Rewrites a JSON schema into Gemini's dialect.
///
/// `type` values are uppercased, `additionalProperties` is dropped, and
/// `items` blocks are guaranteed an explicit type (STRING by default).
pub(crate) fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "type" => {
                        if let Some(kind) = value.as_str() {
                            out.insert("type".to_string(), json!(kind.to_uppercase()));
                        }
                    }
                    "additionalProperties" => {}
                    "properties" => {
                        let mut properties = Map::new();
                        if let Value::Object(props) = value {
                            for (name, prop) in props {
                                properties.insert(name.clone(), gemini_schema(prop));
                            }
                        }
                        out.insert("properties".to_string(), Value::Object(properties));
                    }
                    "items" => {
                        let mut items = gemini_schema(value);
                        if let Value::Object(items_map) = &mut items {
                            items_map
                                .entry("type".to_string())
                                .or_insert_with(|| json!("STRING"));
                        }
                        out.insert("items".to_string(), items);
                    }
                    _ => {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
