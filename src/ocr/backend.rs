//! OCR backend adapters
//!
//! A backend knows how to build an [`OcrEngine`] for one [`EngineKey`]. The
//! registry tries its backends in order; each one either produces an engine,
//! reports itself unavailable (the next backend is tried), or fails hard.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::types::{BackendKind, EngineKey, OcrError, TextRegion};

/// A constructed OCR engine
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// The adapter that built this engine
    fn backend(&self) -> BackendKind;

    /// Recognize text in a PNG-encoded image
    async fn recognize(&self, png: &[u8]) -> Result<Vec<TextRegion>, OcrError>;
}

/// Engine construction failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConstructError {
    /// The backend cannot be used here (not installed, unsupported language)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend is usable but construction failed
    #[error("{0}")]
    Fatal(String),
}

/// OCR backend adapter
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Options this backend accepts; anything else is dropped before
    /// [`OcrBackend::construct`] is called
    fn supported_options(&self) -> &'static [OptionKey];

    /// Whether construction needs PaddleOCR weights on disk
    fn requires_weights(&self) -> bool {
        false
    }

    async fn construct(&self, spec: &EngineSpec) -> Result<Arc<dyn OcrEngine>, ConstructError>;
}

/// Named engine construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    Lang,
    Device,
    DetectionModel,
    RecognitionModel,
    TextlineOrientation,
    RecScoreThresh,
    BoxThresh,
    UnclipRatio,
    CpuThreads,
}

impl OptionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lang => "lang",
            Self::Device => "device",
            Self::DetectionModel => "text_detection_model_name",
            Self::RecognitionModel => "text_recognition_model_name",
            Self::TextlineOrientation => "use_textline_orientation",
            Self::RecScoreThresh => "text_rec_score_thresh",
            Self::BoxThresh => "text_det_box_thresh",
            Self::UnclipRatio => "text_det_unclip_ratio",
            Self::CpuThreads => "cpu_threads",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction options, rendered as strings for the CLI adapters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOptions {
    values: BTreeMap<OptionKey, String>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: OptionKey, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: OptionKey, value: impl ToString) {
        self.values.insert(key, value.to_string());
    }

    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the allowed options, returning the dropped keys
    pub fn restricted_to(&self, allowed: &[OptionKey]) -> (EngineOptions, Vec<OptionKey>) {
        let mut kept = EngineOptions::new();
        let mut dropped = Vec::new();
        for (key, value) in &self.values {
            if allowed.contains(key) {
                kept.values.insert(*key, value.clone());
            } else {
                dropped.push(*key);
            }
        }
        (kept, dropped)
    }
}

/// Everything a backend needs to construct one engine
///
/// `options` carries backend-neutral values (`Lang` is the service language
/// tag); each backend maps them to its own spelling.
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub key: EngineKey,
    pub options: EngineOptions,
}

/// Per-call working directory under the system temp dir, removed on drop
pub(crate) struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) async fn create(prefix: &str) -> Result<Self, OcrError> {
        let path = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_to_drops_unsupported() {
        let options = EngineOptions::new()
            .with(OptionKey::Lang, "eng")
            .with(OptionKey::BoxThresh, 0.3)
            .with(OptionKey::CpuThreads, 4);

        let (kept, dropped) = options.restricted_to(&[OptionKey::Lang, OptionKey::CpuThreads]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.get(OptionKey::Lang), Some("eng"));
        assert_eq!(kept.get(OptionKey::BoxThresh), None);
        assert_eq!(dropped, vec![OptionKey::BoxThresh]);
    }
}
