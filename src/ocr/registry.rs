//! OCR engine registry
//!
//! Engines are keyed by (variant, language), built on first use and kept for
//! the life of the process. Lookups read an immutable snapshot; inserts swap
//! in a new snapshot. Every construction, whatever the key, runs under one
//! registry-wide lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::backend::{ConstructError, EngineOptions, EngineSpec, OcrBackend, OcrEngine};
use super::models::OcrModelStore;
use super::types::{BackendKind, EngineKey, OcrError};

/// A cached engine with the backend that built it
#[derive(Clone)]
pub struct EngineEntry {
    pub engine: Arc<dyn OcrEngine>,
    pub backend: BackendKind,
}

type Snapshot = Arc<HashMap<EngineKey, EngineEntry>>;

/// Keyed, grow-only cache of OCR engines
pub struct EngineRegistry {
    backends: Vec<Arc<dyn OcrBackend>>,
    models: OcrModelStore,
    auto_download: bool,
    engines: RwLock<Snapshot>,
    construct_lock: Mutex<()>,
    constructions: AtomicUsize,
}

impl EngineRegistry {
    /// Create a registry trying `backends` in order
    pub fn new(
        backends: Vec<Arc<dyn OcrBackend>>,
        models: OcrModelStore,
        auto_download: bool,
    ) -> Self {
        Self {
            backends,
            models,
            auto_download,
            engines: RwLock::new(Arc::new(HashMap::new())),
            construct_lock: Mutex::new(()),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &EngineKey) -> Option<EngineEntry> {
        self.snapshot().get(key).cloned()
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.snapshot().contains_key(key)
    }

    /// Cache keys of every loaded engine, sorted
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshot().keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Number of engines constructed so far
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> &OcrModelStore {
        &self.models
    }

    /// Return the engine for `key`, constructing it if needed
    pub async fn get_or_load(
        &self,
        key: EngineKey,
        options: &EngineOptions,
    ) -> Result<EngineEntry, OcrError> {
        if let Some(entry) = self.get(&key) {
            return Ok(entry);
        }

        let _guard = self.construct_lock.lock().await;
        if let Some(entry) = self.get(&key) {
            return Ok(entry);
        }

        let mut reasons = Vec::new();
        for backend in &self.backends {
            let kind = backend.kind();

            if backend.requires_weights() {
                self.check_weights(&key)?;
            }

            let (options, dropped) = options.restricted_to(backend.supported_options());
            if !dropped.is_empty() {
                let names: Vec<&str> = dropped.iter().map(|k| k.as_str()).collect();
                tracing::debug!("{} does not accept options: {}", kind, names.join(", "));
            }

            let spec = EngineSpec {
                key: key.clone(),
                options,
            };
            match backend.construct(&spec).await {
                Ok(engine) => {
                    let entry = EngineEntry {
                        engine,
                        backend: kind,
                    };
                    self.insert(key.clone(), entry.clone());
                    tracing::info!(cache_key = %key, backend = %kind, "Loaded OCR engine");
                    return Ok(entry);
                }
                Err(ConstructError::Unavailable(reason)) => {
                    tracing::warn!("OCR backend {} unavailable for {}: {}", kind, key, reason);
                    reasons.push(format!("{}: {}", kind, reason));
                }
                Err(ConstructError::Fatal(reason)) => {
                    tracing::error!("OCR backend {} failed for {}: {}", kind, key, reason);
                    return Err(OcrError::EngineUnavailable(format!("{}: {}", kind, reason)));
                }
            }
        }

        if reasons.is_empty() {
            reasons.push("no OCR backends configured".to_string());
        }
        Err(OcrError::EngineUnavailable(reasons.join("; ")))
    }

    fn check_weights(&self, key: &EngineKey) -> Result<(), OcrError> {
        let missing = self.models.missing_models(key.variant);
        if missing.is_empty() {
            return Ok(());
        }
        let path = self.models.official_models_dir();
        if !self.auto_download {
            return Err(OcrError::ModelMissing {
                path,
                models: missing,
            });
        }
        tracing::info!(
            "OCR models {} not found, they will be downloaded to {}",
            missing.join(", "),
            path.display()
        );
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        self.engines.read().clone()
    }

    fn insert(&self, key: EngineKey, entry: EngineEntry) {
        let mut engines = self.engines.write();
        let mut next = HashMap::clone(&engines);
        next.insert(key, entry);
        *engines = Arc::new(next);
        self.constructions.fetch_add(1, Ordering::SeqCst);
    }
}
