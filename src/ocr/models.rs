//! PaddleOCR weight storage
//!
//! Weights live under `<paddlex_home>/official_models/<model name>`, one
//! directory per detection/recognition model.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::types::ModelVariant;

/// File extensions that count as model weights
const WEIGHT_EXTENSIONS: &[&str] = &["onnx", "pdiparams", "pdparams"];

/// Location of the PaddleOCR weight cache
#[derive(Debug, Clone)]
pub struct OcrModelStore {
    paddlex_home: PathBuf,
}

/// Download presence of the OCR weights
#[derive(Debug, Clone, Serialize)]
pub struct OcrModelStatus {
    pub downloaded: bool,
    pub mobile_downloaded: bool,
    pub server_downloaded: bool,
    pub path: Option<String>,
}

impl OcrModelStore {
    pub fn new(paddlex_home: impl Into<PathBuf>) -> Self {
        Self {
            paddlex_home: paddlex_home.into(),
        }
    }

    pub fn paddlex_home(&self) -> &Path {
        &self.paddlex_home
    }

    pub fn official_models_dir(&self) -> PathBuf {
        self.paddlex_home.join("official_models")
    }

    /// Models a variant needs, in (detection, recognition) order
    pub fn required_models(variant: ModelVariant) -> [String; 2] {
        [variant.detection_model(), variant.recognition_model()]
    }

    /// Names of the variant's models that have no weights on disk
    pub fn missing_models(&self, variant: ModelVariant) -> Vec<String> {
        let base = self.official_models_dir();
        Self::required_models(variant)
            .into_iter()
            .filter(|name| !has_weights(&base.join(name)))
            .collect()
    }

    pub fn is_downloaded(&self, variant: ModelVariant) -> bool {
        self.missing_models(variant).is_empty()
    }

    pub fn status(&self) -> OcrModelStatus {
        let mobile = self.is_downloaded(ModelVariant::Mobile);
        let server = self.is_downloaded(ModelVariant::Server);
        let dir = self.official_models_dir();
        OcrModelStatus {
            downloaded: mobile || server,
            mobile_downloaded: mobile,
            server_downloaded: server,
            path: dir.exists().then(|| dir.display().to_string()),
        }
    }
}

/// Whether a model directory contains at least one weight file
fn has_weights(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| WEIGHT_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
    })
}
