//! The process-wide translation model slot
//!
//! Holds at most one loaded model. Loading is serialized by a load lock;
//! every inference call, streaming included, holds a separate inference
//! lock for its whole duration because the backing model handles one
//! request at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex, Semaphore};

use super::llama::LlamaServerLoader;
use super::model::{CompletionModel, LoadParams, ModelLoader, SamplingParams};
use super::resolver::ModelResolver;
use super::TranslateError;
use crate::config::TranslateSettings;
use crate::sse::TokenEvent;

/// Worker permits for blocking translation calls
const WORKER_POOL_SIZE: usize = 2;

/// Buffered token events between the producer and the response writer
const STREAM_BUFFER: usize = 32;

/// A loaded translation model; never unloaded
pub struct TranslationHandle {
    pub model: Arc<dyn CompletionModel>,
    pub repo_id: String,
    pub file_name: String,
}

pub struct TranslationModelSlot {
    resolver: ModelResolver,
    loader: Arc<dyn ModelLoader>,
    load_params: LoadParams,
    sampling: SamplingParams,
    timeout: Duration,
    handle: RwLock<Option<Arc<TranslationHandle>>>,
    load_lock: Mutex<()>,
    inference_lock: Arc<Mutex<()>>,
    workers: Arc<Semaphore>,
    resolutions: AtomicUsize,
}

impl TranslationModelSlot {
    /// Slot backed by `llama-server`
    pub fn from_settings(settings: &TranslateSettings) -> Self {
        let loader = Arc::new(LlamaServerLoader::new(settings.llama_server_bin.clone()));
        Self::new(settings, loader)
    }

    pub fn new(settings: &TranslateSettings, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            resolver: ModelResolver::from_settings(settings),
            loader,
            load_params: settings.load.clone(),
            sampling: settings.sampling.clone(),
            timeout: settings.timeout,
            handle: RwLock::new(None),
            load_lock: Mutex::new(()),
            inference_lock: Arc::new(Mutex::new(())),
            workers: Arc::new(Semaphore::new(WORKER_POOL_SIZE)),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    pub fn loader_name(&self) -> &'static str {
        self.loader.name()
    }

    pub fn handle(&self) -> Option<Arc<TranslationHandle>> {
        self.handle.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.read().is_some()
    }

    /// How many times the resolution path has run
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Make sure a model is loaded
    ///
    /// Returns `Ok(false)` when no model file could be resolved. Errors come
    /// only from a failed download or a model that fails to start.
    pub async fn ensure_loaded(&self) -> Result<bool, TranslateError> {
        if self.is_loaded() {
            return Ok(true);
        }

        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return Ok(true);
        }

        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let Some(resolved) = self.resolver.resolve().await? else {
            return Ok(false);
        };

        let started = Instant::now();
        let model = self.loader.load(&resolved.path, &self.load_params).await?;
        tracing::info!(
            "Translation model loaded: {} ({}) in {:.2}s",
            resolved.file_name,
            self.loader.name(),
            started.elapsed().as_secs_f64()
        );

        *self.handle.write() = Some(Arc::new(TranslationHandle {
            model,
            repo_id: self.resolver.repo_id().to_string(),
            file_name: resolved.file_name,
        }));
        Ok(true)
    }

    /// Run one completion on the worker pool under the wall-clock timeout
    ///
    /// On timeout the worker task is left running and finishes in the
    /// background, still holding the inference lock until it does.
    pub async fn translate(&self, prompt: &str) -> Result<String, TranslateError> {
        let handle = self.handle().ok_or(TranslateError::Unresolved)?;
        let lock = self.inference_lock.clone();
        let workers = self.workers.clone();
        let sampling = self.sampling.clone();
        let prompt = prompt.to_string();

        let task = tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|e| TranslateError::Worker(e.to_string()))?;
            let _inference = lock.lock_owned().await;
            handle
                .model
                .complete(&prompt, &sampling)
                .await
                .map_err(TranslateError::from)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TranslateError::Worker(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    "Translation exceeded {}s, abandoning worker",
                    self.timeout.as_secs_f64()
                );
                Err(TranslateError::Timeout(self.timeout))
            }
        }
    }

    /// Start a streaming completion
    ///
    /// Tokens are produced by a spawned task that owns the inference lock
    /// and the upstream stream. Dropping the receiver stops generation.
    pub async fn translate_stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<TokenEvent>, TranslateError> {
        let handle = self.handle().ok_or(TranslateError::Unresolved)?;
        let inference = self.inference_lock.clone().lock_owned().await;
        let mut stream = handle.model.complete_stream(prompt, &self.sampling).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let _inference = inference;
            let started = Instant::now();
            let mut tokens = 0usize;
            let mut cancelled = false;

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        cancelled = true;
                        break;
                    }
                    next = stream.next() => next,
                };
                match next {
                    Some(TokenEvent::Token(token)) => {
                        tokens += 1;
                        if tx.send(TokenEvent::Token(token)).await.is_err() {
                            cancelled = true;
                            break;
                        }
                    }
                    Some(terminal) => {
                        let _ = tx.send(terminal).await;
                        break;
                    }
                    None => {
                        let _ = tx.send(TokenEvent::Done).await;
                        break;
                    }
                }
            }

            drop(stream);
            let elapsed = started.elapsed().as_secs_f64();
            if cancelled {
                tracing::info!(
                    "Translation stream cancelled by client after {} tokens ({:.2}s)",
                    tokens,
                    elapsed
                );
            } else {
                tracing::info!("Translation stream finished: {} tokens in {:.2}s", tokens, elapsed);
            }
        });

        Ok(rx)
    }
}
