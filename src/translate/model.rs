//! Completion model abstraction
//!
//! The slot only needs two capabilities from a loaded model: a blocking
//! completion and a token stream. Loaders turn a model file into one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::sse::TokenStream;

/// Model load parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams {
    pub n_ctx: u32,
    pub n_threads: usize,
    pub n_batch: u32,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_threads: crate::config::default_threads(),
            n_batch: 128,
        }
    }
}

/// Sampling parameters sent with every completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.6,
            top_k: 20,
            repeat_penalty: 1.05,
        }
    }
}

/// Errors raised by a loaded model or its loader
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to start model server: {0}")]
    Spawn(String),

    #[error("Model server did not become ready: {0}")]
    NotReady(String),

    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Unexpected completion response: {0}")]
    Protocol(String),

    #[error("Model I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A loaded model; not safe for concurrent calls
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<String, ModelError>;

    async fn complete_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<TokenStream, ModelError>;
}

/// Turns a model file into a [`CompletionModel`]
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Short name reported by `/health`
    fn name(&self) -> &'static str;

    async fn load(
        &self,
        path: &Path,
        params: &LoadParams,
    ) -> Result<Arc<dyn CompletionModel>, ModelError>;
}
