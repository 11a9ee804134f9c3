use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::media::DynMediaAdapter;
use crate::types::{AttachmentKind, GenerationRequest, Message, Role, Tool, ToolResultContent};

/// Builds the Chat Completions request body.
pub(crate) async fn build_chat_body(
    request: &GenerationRequest,
    model: &str,
    stream: bool,
    media: &DynMediaAdapter,
) -> Result<Value, LLMError> {
    let mut messages = Vec::new();
    if let Some(prompt) = &request.system_prompt {
        messages.push(json!({ "role": "system", "content": prompt }));
    }
    for message in &request.messages {
        convert_message(message, media, &mut messages).await?;
    }

    if messages.is_empty() {
        return Err(LLMError::invalid_request(
            "Chat Completions request requires at least one message",
        ));
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    let obj = body.as_object_mut().expect("body is an object");

    if stream {
        // Ask for a usage roll-up on the final chunk.
        obj.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }
    if let Some(max_tokens) = request.max_tokens {
        obj.insert("max_tokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }
    if !request.tools.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!(convert_tools(&request.tools, request.config.strict_tools)),
        );
    }
    for (key, value) in &request.config.extra {
        obj.insert(key.clone(), value.clone());
    }

    Ok(body)
}

async fn convert_message(
    message: &Message,
    media: &DynMediaAdapter,
    out: &mut Vec<Value>,
) -> Result<(), LLMError> {
    match message.role {
        Role::System => out.push(json!({
            "role": "system",
            "content": message.content.clone().unwrap_or_default(),
        })),
        Role::Developer => out.push(json!({
            "role": "developer",
            "content": message.content.clone().unwrap_or_default(),
        })),
        Role::User => {
            if message.attachments.is_empty() {
                out.push(json!({
                    "role": "user",
                    "content": message.content.clone().unwrap_or_default(),
                }));
            } else {
                let mut parts = Vec::new();
                if let Some(text) = &message.content {
                    parts.push(json!({ "type": "text", "text": text }));
                }
                for attachment in &message.attachments {
                    parts.push(convert_attachment(&attachment.kind, media).await?);
                }
                out.push(json!({ "role": "user", "content": parts }));
            }
        }
        Role::Assistant => {
            let mut entry = Map::new();
            entry.insert("role".to_string(), json!("assistant"));
            entry.insert(
                "content".to_string(),
                message
                    .content
                    .clone()
                    .map_or(Value::Null, Value::String),
            );
            if let Some(calls) = &message.tool_calls {
                let rendered: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        let args: Map<String, Value> = call
                            .arguments()
                            .into_iter()
                            .map(|(key, value)| (key, value.to_json()))
                            .collect();
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(args).to_string(),
                            }
                        })
                    })
                    .collect();
                entry.insert("tool_calls".to_string(), json!(rendered));
            }
            out.push(Value::Object(entry));
        }
        // Tool turns travel as one function-role message per result.
        Role::Tool => {
            for result in message.tool_results.iter().flatten() {
                out.push(json!({
                    "role": "function",
                    "name": result.name,
                    "content": render_result_content(&result.content),
                }));
            }
        }
    }
    Ok(())
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
            let url = format!("data:{mime_type};base64,{}", BASE64.encode(bytes));
            Ok(json!({ "type": "image_url", "image_url": { "url": url } }))
        }
        AttachmentKind::Document { .. }
        | AttachmentKind::Video { .. }
        | AttachmentKind::Audio { .. } => Err(LLMError::invalid_request(
            "Chat Completions accepts only image attachments",
        )),
    }
}

fn render_result_content(content: &[ToolResultContent]) -> String {
    let mut text = String::new();
    for item in content {
        match item {
            ToolResultContent::Text { text: part } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(part);
            }
            // Binary results degrade to a placeholder; the wire format is
            // text-only here.
            other => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("[unsupported {:?} content]", other.value_type()));
            }
        }
    }
    text
}

fn convert_tools(tools: &[Tool], strict: bool) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let parameters = if strict {
                strict_schema(&tool.raw_input_schema)
            } else {
                tool.raw_input_schema.clone()
            };
            let mut function = Map::new();
            function.insert("name".to_string(), json!(tool.name));
            function.insert("description".to_string(), json!(tool.description));
            function.insert("parameters".to_string(), parameters);
            if strict {
                function.insert("strict".to_string(), json!(true));
            }
            json!({ "type": "function", "function": Value::Object(function) })
        })
        .collect()
}

/// Rewrites a JSON schema into OpenAI strict mode.
///
/// Every object node gains `additionalProperties: false` and a `required`
/// array equal to the sorted list of all declared properties; the transform
/// recurses through `properties` and `items` and discards any original
/// `required`. Applying it twice is a no-op.
pub(crate) fn strict_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "properties" => {
                        let mut properties = Map::new();
                        if let Value::Object(props) = value {
                            for (name, prop) in props {
                                properties.insert(name.clone(), strict_schema(prop));
                            }
                        }
                        out.insert("properties".to_string(), Value::Object(properties));
                    }
                    "items" => {
                        out.insert("items".to_string(), strict_schema(value));
                    }
                    // The original required list is discarded.
                    "required" => {}
                    _ => {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }

            let is_object_schema = map.get("type").and_then(Value::as_str) == Some("object")
                || map.contains_key("properties");
            if is_object_schema {
                let mut names: Vec<String> = out
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().collect())
                    .unwrap_or_default();
                names.sort();
                out.insert("additionalProperties".to_string(), json!(false));
                out.insert("required".to_string(), json!(names));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
