use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest};

use super::error::parse_gemini_error;
use super::types::{GeminiFile, GeminiFileEnvelope};

const STATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATE_POLL_LIMIT: u32 = 60;

/// Uploads a payload through the File API's two-step resumable protocol and
/// waits until the file becomes ACTIVE.
///
/// Returns the file URI to reference from request parts.
///
/// # Errors
///
/// Fails when the upload session cannot be opened, the upload itself is
/// rejected, or the file ends in the FAILED state.
pub(crate) async fn upload_file(
    transport: &DynHttpTransport,
    base_url: &str,
    api_key: &str,
    data: &[u8],
    mime_type: &str,
    display_name: &str,
) -> Result<String, LLMError> {
    let base = base_url.trim_end_matches('/');

    // Step one: open a resumable session; the target URL comes back in a header.
    let start_url = format!("{base}/upload/v1beta/files?key={api_key}");
    let metadata = json!({ "file": { "display_name": display_name } });
    let start_request = HttpRequest::post_json(
        start_url,
        serde_json::to_vec(&metadata).map_err(|err| LLMError::InvalidRequest {
            message: format!("failed to serialize upload metadata: {err}"),
        })?,
    )
    .with_headers(HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Goog-Upload-Protocol".to_string(), "resumable".to_string()),
        ("X-Goog-Upload-Command".to_string(), "start".to_string()),
        (
            "X-Goog-Upload-Header-Content-Length".to_string(),
            data.len().to_string(),
        ),
        (
            "X-Goog-Upload-Header-Content-Type".to_string(),
            mime_type.to_string(),
        ),
    ]));
    let start_response = transport.send(start_request).await?;
    if !(200..300).contains(&start_response.status) {
        let status = start_response.status;
        let text = start_response.into_string()?;
        return Err(parse_gemini_error(status, &text));
    }
    let upload_url = start_response
        .header("x-goog-upload-url")
        .map(str::to_string)
        .ok_or_else(|| LLMError::Parsing {
            message: "upload session response missing x-goog-upload-url".to_string(),
        })?;

    // Step two: send the bytes and finalize in one command.
    let upload_request = HttpRequest::post_json(upload_url, Vec::new())
        .with_headers(HashMap::from([
            ("Content-Length".to_string(), data.len().to_string()),
            ("X-Goog-Upload-Offset".to_string(), "0".to_string()),
            (
                "X-Goog-Upload-Command".to_string(),
                "upload, finalize".to_string(),
            ),
        ]))
        .with_body(data.to_vec());
    let upload_response = transport.send(upload_request).await?;
    let status = upload_response.status;
    let text = upload_response.into_string()?;
    if !(200..300).contains(&status) {
        return Err(parse_gemini_error(status, &text));
    }
    let envelope: GeminiFileEnvelope = serde_json::from_str(&text)
        .map_err(|err| LLMError::parsing(format!("bad file upload response: {err}"), &text))?;

    wait_until_active(transport, base, api_key, envelope.file).await
}

async fn wait_until_active(
    transport: &DynHttpTransport,
    base: &str,
    api_key: &str,
    mut file: GeminiFile,
) -> Result<String, LLMError> {
    for _ in 0..STATE_POLL_LIMIT {
        match file.state.as_deref() {
            Some("ACTIVE") => {
                return file.uri.ok_or_else(|| LLMError::Parsing {
                    message: "active file is missing its uri".to_string(),
                });
            }
            Some("FAILED") => {
                return Err(LLMError::Server {
                    status: 500,
                    message: format!(
                        "file upload processing failed: {}",
                        file.name.unwrap_or_default()
                    ),
                });
            }
            _ => {}
        }

        let Some(name) = file.name.clone() else {
            return Err(LLMError::Parsing {
                message: "uploaded file is missing its name".to_string(),
            });
        };
        debug!(file = %name, "waiting for uploaded file to become active");
        sleep(STATE_POLL_INTERVAL).await;

        let url = format!("{base}/v1beta/{name}?key={api_key}");
        let response = transport.send(HttpRequest::get(url)).await?;
        let status = response.status;
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_gemini_error(status, &text));
        }
        file = serde_json::from_str(&text)
            .map_err(|err| LLMError::parsing(format!("bad file status response: {err}"), &text))?;
    }

    Err(LLMError::timeout("uploaded file never became active"))
}
