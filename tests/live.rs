//! Connectivity tests against real endpoints.
//!
//! All tests are ignored by default; they run only when the matching
//! environment variables are present (a `.env` file is honoured).

use std::env;
use std::sync::Arc;

use dotenvy::dotenv;
use futures_util::StreamExt;
use hashi::LLMProvider;
use hashi::http::reqwest::ReqwestTransport;
use hashi::provider::anthropic_messages::AnthropicMessagesProvider;
use hashi::provider::google_gemini::GoogleGeminiProvider;
use hashi::provider::openai_chat::OpenAiChatProvider;
use hashi::types::{GenerationRequest, Message};

fn load_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn basic_request(model: String) -> GenerationRequest {
    GenerationRequest {
        model: Some(model),
        max_tokens: Some(128),
        messages: vec![
            Message::system("You are a helpful assistant."),
            Message::user("Introduce the Rust language in one sentence."),
        ],
        ..GenerationRequest::default()
    }
}

#[tokio::test]
#[ignore = "requires a valid Anthropic endpoint"]
async fn anthropic_messages_stream_live() {
    dotenv().ok();
    let (Some(key), Some(model)) = (
        load_env_var("ANTHROPIC_API_KEY"),
        load_env_var("ANTHROPIC_MODEL"),
    ) else {
        eprintln!("skip anthropic live test: environment not configured");
        return;
    };

    let transport = Arc::new(ReqwestTransport::default_client().expect("transport"));
    let provider = AnthropicMessagesProvider::new(transport, key);
    let mut stream = provider
        .stream(basic_request(model))
        .await
        .expect("stream should start");

    let mut last = None;
    while let Some(item) = stream.next().await {
        last = Some(item.expect("snapshot"));
    }
    let last = last.expect("at least one snapshot");
    assert!(!last.response_text().is_empty());
    assert!(last.metadata.is_some());
}

#[tokio::test]
#[ignore = "requires a valid OpenAI-compatible endpoint"]
async fn openai_chat_generate_live() {
    dotenv().ok();
    let (Some(key), Some(model)) = (
        load_env_var("OPENAI_API_KEY"),
        load_env_var("OPENAI_CHAT_MODEL"),
    ) else {
        eprintln!("skip openai chat live test: environment not configured");
        return;
    };

    let transport = Arc::new(ReqwestTransport::default_client().expect("transport"));
    let provider = OpenAiChatProvider::new(transport, key);
    let response = provider
        .generate(basic_request(model))
        .await
        .expect("generate should succeed");
    assert!(!response.response_text().is_empty());
}

#[tokio::test]
#[ignore = "requires a valid Gemini endpoint"]
async fn google_gemini_stream_live() {
    dotenv().ok();
    let (Some(key), Some(model)) = (
        load_env_var("GEMINI_API_KEY"),
        load_env_var("GEMINI_MODEL"),
    ) else {
        eprintln!("skip gemini live test: environment not configured");
        return;
    };

    let transport = Arc::new(ReqwestTransport::default_client().expect("transport"));
    let provider = GoogleGeminiProvider::new(transport, key);
    let mut stream = provider
        .stream(basic_request(model))
        .await
        .expect("stream should start");

    let mut saw_snapshot = false;
    while let Some(item) = stream.next().await {
        item.expect("snapshot");
        saw_snapshot = true;
    }
    assert!(saw_snapshot, "stream should yield at least one snapshot");
}
