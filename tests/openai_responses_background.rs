use std::sync::Arc;

use futures_util::StreamExt;
use hashi::LLMError;
use hashi::provider::openai_responses::OpenAiResponsesProvider;
use hashi::types::{GenerationRequest, Message};
use serde_json::json;

mod common;
use common::{MockTransport, ScriptedStream, sse_body};

fn request() -> GenerationRequest {
    GenerationRequest {
        model: Some("gpt-5".to_string()),
        messages: vec![Message::user("Say hello")],
        ..GenerationRequest::default()
    }
}

#[tokio::test(start_paused = true)]
async fn background_stream_resumes_from_last_sequence_number() {
    let transport = Arc::new(MockTransport::new());

    // Initial connection: created + two text deltas, then the link drops.
    let first = sse_body(&[
        json!({"type": "response.created", "sequence_number": 0,
               "response": {"id": "resp_R", "model": "gpt-5", "output": []}}),
        json!({"type": "response.output_text.delta", "sequence_number": 1, "delta": "Hel"}),
        json!({"type": "response.output_text.delta", "sequence_number": 2, "delta": "lo"}),
    ]);
    transport.push_stream(ScriptedStream::ok(vec![
        Ok(first),
        Err(LLMError::network("connection lost")),
    ]));

    // Status probe before the retry: still running.
    transport.push_response(200, r#"{"id":"resp_R","status":"in_progress","output":[]}"#);

    // Resumed connection delivers the tail and completion.
    transport.push_stream(ScriptedStream::ok(vec![Ok(sse_body(&[
        json!({"type": "response.output_text.delta", "sequence_number": 3, "delta": "!"}),
        json!({"type": "response.completed", "sequence_number": 4, "response": {
            "id": "resp_R", "status": "completed", "model": "gpt-5",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "Hello!"}]}],
            "usage": {"input_tokens": 3, "output_tokens": 3, "total_tokens": 6}
        }}),
    ]))]));

    let provider = OpenAiResponsesProvider::new(transport.clone(), "sk-test");
    let mut stream = provider
        .stream_background(request())
        .await
        .expect("background stream starts");

    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("final snapshot");
    assert_eq!(last.response_text(), "Hello!");
    assert_eq!(
        last.metadata.as_ref().and_then(|m| m.response_id.as_deref()),
        Some("resp_R")
    );

    // The resume request targeted the recorded id and sequence number.
    let requests = transport.recorded_requests();
    let resume = requests
        .iter()
        .find(|req| req.url.contains("starting_after"))
        .expect("resume request issued");
    assert!(resume.url.contains("/responses/resp_R"));
    assert!(resume.url.contains("stream=true"));
    assert!(resume.url.contains("starting_after=2"));

    // The initial POST asked for a stored background response.
    let body: serde_json::Value =
        serde_json::from_slice(requests[0].body.as_ref().expect("body")).expect("json");
    assert_eq!(body["background"], json!(true));
    assert_eq!(body["store"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn background_generate_polls_until_completed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(200, r#"{"id":"resp_B","status":"queued","output":[]}"#);
    transport.push_response(200, r#"{"id":"resp_B","status":"in_progress","output":[]}"#);
    transport.push_response(
        200,
        r#"{"id":"resp_B","status":"completed","model":"gpt-5",
            "output":[{"type":"message","content":[{"type":"output_text","text":"done"}]}],
            "usage":{"input_tokens":1,"output_tokens":1,"total_tokens":2}}"#,
    );

    let provider = OpenAiResponsesProvider::new(transport.clone(), "sk-test");
    let response = provider
        .generate_background(request())
        .await
        .expect("background generate");
    assert_eq!(response.response_text(), "done");

    // Submit plus two polls.
    assert_eq!(transport.recorded_requests().len(), 3);
}

#[tokio::test]
async fn cancel_treats_conflict_as_success() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(409, r#"{"error":{"message":"already cancelled"}}"#);
    let provider = OpenAiResponsesProvider::new(transport, "sk-test");
    provider
        .cancel_response("resp_X")
        .await
        .expect("409 counts as success");
}

#[tokio::test]
async fn failed_background_response_surfaces_server_error() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(
        200,
        r#"{"id":"resp_F","status":"failed","error":{"message":"model exploded"},"output":[]}"#,
    );
    let provider = OpenAiResponsesProvider::new(transport, "sk-test");
    let err = provider
        .generate_background(request())
        .await
        .expect_err("failed response");
    match err {
        LLMError::Server { message, .. } => assert!(message.contains("model exploded")),
        other => panic!("unexpected error: {other:?}"),
    }
}
