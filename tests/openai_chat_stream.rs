use std::sync::Arc;

use futures_util::StreamExt;
use hashi::LLMProvider;
use hashi::provider::openai_chat::OpenAiChatProvider;
use hashi::types::{FinishReason, GenerationRequest, Message};
use hashi::value::Value;
use serde_json::json;

mod common;
use common::{MockTransport, ScriptedStream, sse_body};

fn request() -> GenerationRequest {
    GenerationRequest {
        model: Some("gpt-4o".to_string()),
        messages: vec![Message::user("What is x?")],
        ..GenerationRequest::default()
    }
}

#[tokio::test]
async fn assembles_streamed_tool_call_across_chunks() {
    let transport = Arc::new(MockTransport::new());
    let mut body = sse_body(&[
        json!({"id": "chatcmpl-1", "model": "gpt-4o", "choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "f"}}
        ]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"x\":"}}
        ]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "1}"}}
        ]}, "finish_reason": "tool_calls"}]}),
    ]);
    body.extend_from_slice(b"data: [DONE]\n\n");
    transport.push_stream(ScriptedStream::ok(vec![Ok(body)]));

    let provider = OpenAiChatProvider::new(transport.clone(), "sk-test");
    let mut stream = provider.stream(request()).await.expect("stream starts");

    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("final snapshot");

    assert_eq!(last.tool_calls.len(), 1);
    let call = &last.tool_calls[0];
    assert_eq!(call.name, "f");
    assert_eq!(call.id, "c1");
    assert_eq!(call.parameters.get("x"), Some(&Value::Int(1)));
    assert_eq!(
        last.metadata.and_then(|m| m.finish_reason),
        Some(FinishReason::ToolUse)
    );

    // Bearer auth on the wire.
    let requests = transport.recorded_requests();
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
}

#[tokio::test]
async fn accumulates_text_reasoning_and_usage() {
    let transport = Arc::new(MockTransport::new());
    let mut body = sse_body(&[
        json!({"id": "chatcmpl-2", "choices": [{"delta": {"reasoning_content": "let me think. "}}]}),
        json!({"choices": [{"delta": {"content": "Answer: "}}]}),
        json!({"choices": [{"delta": {"content": "42"}, "finish_reason": "stop"}]}),
        json!({"choices": [], "usage": {"prompt_tokens": 8, "completion_tokens": 3, "total_tokens": 11,
               "completion_tokens_details": {"reasoning_tokens": 2}}}),
    ]);
    body.extend_from_slice(b"data: [DONE]\n\n");
    transport.push_stream(ScriptedStream::ok(vec![Ok(body)]));

    let provider = OpenAiChatProvider::new(transport, "sk-test");
    let mut stream = provider.stream(request()).await.expect("stream starts");

    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("final snapshot");

    assert_eq!(last.texts.response.as_deref(), Some("Answer: 42"));
    assert_eq!(last.texts.reasoning.as_deref(), Some("let me think. "));
    let metadata = last.metadata.expect("metadata");
    assert_eq!(metadata.total_tokens, Some(11));
    assert_eq!(metadata.reasoning_tokens, Some(2));
    assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));
}
