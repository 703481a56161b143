//! OCR Module
//!
//! Lazily constructed, cached OCR engines keyed by model variant and
//! language, with an ordered chain of backend adapters:
//! - Tesseract (local CLI)
//! - PaddleOCR 3.x (local CLI, needs PP-OCRv5 weights)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rsta_server::ocr::{ModelVariant, OcrService};
//!
//! let service = OcrService::from_settings(&settings.ocr);
//! let text = service.recognize(png_bytes, ModelVariant::Mobile, "en").await?;
//! ```

mod backend;
mod models;
mod paddle;
pub mod preprocess;
mod registry;
mod service;
mod tesseract;
mod types;

pub use backend::{ConstructError, EngineOptions, EngineSpec, OcrBackend, OcrEngine, OptionKey};
pub use models::{OcrModelStatus, OcrModelStore};
pub use paddle::PaddleCliBackend;
pub use registry::{EngineEntry, EngineRegistry};
pub use service::OcrService;
pub use tesseract::TesseractBackend;
pub use types::{BackendKind, EngineKey, ModelVariant, OcrError, TextRegion};
