//! Unified multi-vendor LLM client.
//!
//! One provider-agnostic generate/stream surface over Anthropic Messages,
//! OpenAI Chat Completions, OpenAI Responses, and Google Gemini, with
//! validated tool dispatch and incremental streaming snapshots.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod provider;
pub mod stream;
pub mod tools;
pub mod types;
pub mod value;

pub use client::LLMClient;
pub use error::LLMError;
pub use provider::{GenerationStream, LLMProvider};
pub use tools::{Tools, current_tool_call_id};
pub use types::*;
pub use value::Value;
