//! LLM backend used for text analysis

mod client;

pub use client::{ApiFormat, ChatMessage, LlmClient, UpstreamError};
