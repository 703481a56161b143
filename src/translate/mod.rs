//! Local translation model
//!
//! Resolves a GGUF file (locally or from the model hub), serves it through
//! `llama-server` and serializes inference through a single slot.

mod hub;
mod llama;
mod model;
mod resolver;
mod slot;

use std::time::Duration;

pub use hub::{HubClient, HubError};
pub use llama::LlamaServerLoader;
pub use model::{CompletionModel, LoadParams, ModelError, ModelLoader, SamplingParams};
pub use resolver::{pick_by_quant, ModelResolver, ResolvedModel};
pub use slot::{TranslationHandle, TranslationModelSlot};

/// Translation errors
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("No translation model is available")]
    Unresolved,

    #[error("{0}")]
    NoRemoteMatch(String),

    #[error("Translation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("Translation worker failed: {0}")]
    Worker(String),
}
