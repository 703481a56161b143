//! OCR Types
//!
//! Cache keys, backend discriminators and errors shared by the registry,
//! the backend adapters and the request handlers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::lang;

/// OCR model size/accuracy tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Mobile,
    Server,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Mobile, ModelVariant::Server];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Server => "server",
        }
    }

    /// Label used in progress messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mobile => "Mobile",
            Self::Server => "Server",
        }
    }

    /// PaddleOCR detection model name for this tier
    pub fn detection_model(&self) -> String {
        format!("PP-OCRv5_{}_det", self.as_str())
    }

    /// PaddleOCR recognition model name for this tier
    pub fn recognition_model(&self) -> String {
        format!("PP-OCRv5_{}_rec", self.as_str())
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mobile" => Ok(Self::Mobile),
            "server" => Ok(Self::Server),
            other => Err(OcrError::InvalidVariant(other.to_string())),
        }
    }
}

/// Which concrete adapter produced an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tesseract,
    #[serde(rename = "paddleocr")]
    PaddleOcr,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::PaddleOcr => "paddleocr",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "paddleocr" | "paddle" => Ok(Self::PaddleOcr),
            other => Err(OcrError::EngineUnavailable(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Engine cache key: one engine per (variant, language)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineKey {
    pub variant: ModelVariant,
    pub lang: String,
}

impl EngineKey {
    pub fn new(variant: ModelVariant, lang: &str) -> Self {
        Self {
            variant,
            lang: lang::normalize_tag(lang),
        }
    }
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.variant, self.lang)
    }
}

/// A recognized line of text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl TextRegion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("Unknown OCR model type: {0}")]
    InvalidVariant(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error(
        "OCR model files not found: {}\nModel directory: {}\n\
         Download them from the settings page, or set paddleocr.auto_download to true.",
        .models.join(", "),
        .path.display()
    )]
    ModelMissing { path: PathBuf, models: Vec<String> },

    #[error("No OCR backend available: {0}")]
    EngineUnavailable(String),

    #[error("OCR recognition failed: {0}")]
    Recognition(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display() {
        let key = EngineKey::new(ModelVariant::Server, " JA ");
        assert_eq!(key.to_string(), "server_ja");
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!("Mobile".parse::<ModelVariant>().unwrap(), ModelVariant::Mobile);
        assert!(matches!(
            "tiny".parse::<ModelVariant>(),
            Err(OcrError::InvalidVariant(v)) if v == "tiny"
        ));
        assert_eq!(ModelVariant::Mobile.detection_model(), "PP-OCRv5_mobile_det");
    }

    #[test]
    fn test_backend_serde_names() {
        assert_eq!(
            serde_json::to_string(&BackendKind::PaddleOcr).unwrap(),
            "\"paddleocr\""
        );
        assert_eq!("paddleocr".parse::<BackendKind>().unwrap(), BackendKind::PaddleOcr);
    }

    #[test]
    fn test_model_missing_message_names_path() {
        let err = OcrError::ModelMissing {
            path: PathBuf::from("/data/paddlex/official_models"),
            models: vec!["PP-OCRv5_mobile_det".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("/data/paddlex/official_models"));
        assert!(message.contains("PP-OCRv5_mobile_det"));
    }
}
