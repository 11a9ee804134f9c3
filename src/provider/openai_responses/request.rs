use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::media::DynMediaAdapter;
use crate::types::{AttachmentKind, GenerationRequest, Message, Role, Tool, ToolResultContent};

use crate::provider::openai_chat::request::strict_schema;

/// Builds the `/v1/responses` request body.
///
/// `background` requests are stored server-side so they can be polled and
/// resumed; the caller controls `stream` independently.
pub(crate) async fn build_responses_body(
    request: &GenerationRequest,
    model: &str,
    stream: bool,
    background: bool,
    media: &DynMediaAdapter,
) -> Result<Value, LLMError> {
    let mut instructions = Vec::new();
    if let Some(prompt) = &request.system_prompt {
        instructions.push(prompt.clone());
    }

    let mut input = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System | Role::Developer => {
                if let Some(text) = &message.content {
                    instructions.push(text.clone());
                }
            }
            _ => convert_message(message, media, &mut input).await?,
        }
    }

    if input.is_empty() {
        return Err(LLMError::invalid_request(
            "Responses request requires at least one input message",
        ));
    }

    let mut body = json!({
        "model": model,
        "input": input,
        "stream": stream,
    });
    let obj = body.as_object_mut().expect("body is an object");

    if background {
        obj.insert("background".to_string(), json!(true));
        obj.insert("store".to_string(), json!(true));
    }
    if !instructions.is_empty() {
        obj.insert("instructions".to_string(), json!(instructions.join("\n\n")));
    }
    if let Some(max_tokens) = request.max_tokens {
        obj.insert("max_output_tokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        obj.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(reasoning) = &request.config.reasoning {
        if let Some(level) = reasoning.level {
            obj.insert("reasoning".to_string(), json!({ "effort": level.as_str() }));
        }
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
        Role::User => {
            let mut parts = Vec::new();
            if let Some(text) = &message.content {
                parts.push(json!({ "type": "input_text", "text": text }));
            }
            for attachment in &message.attachments {
                parts.push(convert_attachment(&attachment.kind, media).await?);
            }
            out.push(json!({ "role": "user", "content": parts }));
        }
        Role::Assistant => {
            if let Some(text) = &message.content {
                out.push(json!({
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": text }],
                }));
            }
            for call in message.tool_calls.iter().flatten() {
                let args: Map<String, Value> = call
                    .arguments()
                    .into_iter()
                    .map(|(key, value)| (key, value.to_json()))
                    .collect();
                out.push(json!({
                    "type": "function_call",
                    "call_id": call.id,
                    "name": call.name,
                    "arguments": Value::Object(args).to_string(),
                }));
            }
        }
        Role::Tool => {
            for result in message.tool_results.iter().flatten() {
                out.push(json!({
                    "type": "function_call_output",
                    "call_id": result.id,
                    "output": render_result_text(&result.content),
                }));
            }
        }
        Role::System | Role::Developer => unreachable!("folded into instructions"),
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
            Ok(json!({ "type": "input_image", "image_url": url }))
        }
        AttachmentKind::Document { data, mime_type: _ } => Ok(json!({
            "type": "input_file",
            "filename": "document.pdf",
            "file_data": format!("data:application/pdf;base64,{}", BASE64.encode(data)),
        })),
        AttachmentKind::Video { .. } | AttachmentKind::Audio { .. } => {
            Err(LLMError::invalid_request(
                "Responses accepts only image and document attachments",
            ))
        }
    }
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

/// Responses tools are flat function definitions (no `function` wrapper).
fn convert_tools(tools: &[Tool], strict: bool) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let parameters = if strict {
                strict_schema(&tool.raw_input_schema)
            } else {
                tool.raw_input_schema.clone()
            };
            let mut def = Map::new();
            def.insert("type".to_string(), json!("function"));
            def.insert("name".to_string(), json!(tool.name));
            def.insert("description".to_string(), json!(tool.description));
            def.insert("parameters".to_string(), parameters);
            if strict {
                def.insert("strict".to_string(), json!(true));
            }
            Value::Object(def)
        })
        .collect()
}
