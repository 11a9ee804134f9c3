use std::sync::Arc;

use futures_util::StreamExt;
use hashi::provider::anthropic_messages::AnthropicMessagesProvider;
use hashi::types::{FinishReason, GenerationRequest, Message};
use hashi::value::Value;
use hashi::{LLMError, LLMProvider};
use serde_json::json;

mod common;
use common::{MockTransport, ScriptedStream, sse_body};

fn request() -> GenerationRequest {
    GenerationRequest {
        model: Some("claude-sonnet-4-5".to_string()),
        max_tokens: Some(256),
        messages: vec![Message::user("Say hello")],
        ..GenerationRequest::default()
    }
}

#[tokio::test]
async fn streams_basic_text_turn_with_metadata() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(ScriptedStream::ok(vec![Ok(sse_body(&[
        json!({"type": "message_start", "message": {
            "id": "msg_X", "model": "claude-sonnet-4-5", "content": [],
            "usage": {"input_tokens": 11, "output_tokens": 1}
        }}),
        json!({"type": "content_block_start", "index": 0,
               "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": "Hello"}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": " there!"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
               "usage": {"output_tokens": 6}}),
        json!({"type": "message_stop"}),
    ]))]));

    let provider = AnthropicMessagesProvider::new(transport.clone(), "test-key");
    let mut stream = provider.stream(request()).await.expect("stream starts");

    let mut snapshots = Vec::new();
    while let Some(item) = stream.next().await {
        snapshots.push(item.expect("snapshot"));
    }

    // Successive response texts are prefixes of their successors.
    let mut previous = String::new();
    for snapshot in &snapshots {
        let current = snapshot.response_text().to_string();
        assert!(
            current.starts_with(&previous),
            "snapshot text shrank: {previous:?} -> {current:?}"
        );
        previous = current;
    }

    let last = snapshots.last().expect("final snapshot");
    assert_eq!(last.response_text(), "Hello there!");
    let metadata = last.metadata.as_ref().expect("metadata");
    assert_eq!(metadata.response_id.as_deref(), Some("msg_X"));
    assert_eq!(metadata.input_tokens, Some(11));
    assert_eq!(metadata.output_tokens, Some(6));
    assert_eq!(metadata.finish_reason, Some(FinishReason::Stop));

    // The wire request carried the API key header and streaming flag.
    let requests = transport.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("x-api-key").map(String::as_str),
        Some("test-key")
    );
    let body: serde_json::Value =
        serde_json::from_slice(requests[0].body.as_ref().expect("body")).expect("json");
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["max_tokens"], json!(256));
}

#[tokio::test]
async fn assembles_tool_use_from_partial_json_deltas() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(ScriptedStream::ok(vec![Ok(sse_body(&[
        json!({"type": "message_start", "message": {
            "id": "msg_T", "model": "claude-sonnet-4-5", "content": []
        }}),
        json!({"type": "content_block_start", "index": 0, "content_block": {
            "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}
        }}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "input_json_delta", "partial_json": "{\"loca"}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "input_json_delta", "partial_json": "tion\": \"Pa"}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "input_json_delta", "partial_json": "ris\"}"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {}}),
        json!({"type": "message_stop"}),
    ]))]));

    let provider = AnthropicMessagesProvider::new(transport, "test-key");
    let mut stream = provider.stream(request()).await.expect("stream starts");

    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("final snapshot");

    assert_eq!(last.tool_calls.len(), 1);
    let call = &last.tool_calls[0];
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.id, "toolu_1");
    assert_eq!(call.parameters.len(), 1);
    assert_eq!(call.parameters.get("location"), Some(&Value::from("Paris")));
    assert_eq!(
        last.metadata.and_then(|m| m.finish_reason),
        Some(FinishReason::ToolUse)
    );
}

#[tokio::test]
async fn cancellation_yields_last_snapshot_without_error() {
    let transport = Arc::new(MockTransport::new());
    // The connection stays open after the first delta; only cancellation
    // can end the turn.
    transport.push_stream(ScriptedStream::hanging(vec![Ok(sse_body(&[
        json!({"type": "message_start", "message": {
            "id": "msg_C", "model": "claude-sonnet-4-5", "content": []
        }}),
        json!({"type": "content_block_start", "index": 0,
               "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": "partial"}}),
    ]))]));

    let token = tokio_util::sync::CancellationToken::new();
    let mut cancelled_request = request();
    cancelled_request.config.cancellation = Some(token.clone());

    let provider = AnthropicMessagesProvider::new(transport, "test-key");
    let mut stream = provider
        .stream(cancelled_request)
        .await
        .expect("stream starts");

    // Drain the snapshots produced so far.
    let mut last = None;
    for _ in 0..3 {
        last = Some(stream.next().await.expect("snapshot").expect("ok"));
    }
    assert_eq!(last.expect("snapshot").response_text(), "partial");

    token.cancel();
    let final_snapshot = stream
        .next()
        .await
        .expect("cancellation yields a final snapshot")
        .expect("cancellation is not an error");
    assert_eq!(final_snapshot.response_text(), "partial");
    assert!(stream.next().await.is_none(), "stream closes cleanly");
}

#[tokio::test]
async fn error_status_before_stream_maps_through_taxonomy() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(ScriptedStream {
        status: 401,
        chunks: vec![Ok(
            br#"{"type":"error","error":{"type":"authentication_error","message":"bad key"}}"#
                .to_vec(),
        )],
        hang_after: false,
    });

    let provider = AnthropicMessagesProvider::new(transport, "bad-key");
    let err = match provider.stream(request()).await {
        Ok(_) => panic!("401 rejects"),
        Err(err) => err,
    };
    assert!(matches!(err, LLMError::Authentication { .. }));
}
