//! OCR Service
//!
//! Ties the engine registry to request handling: resolves the engine for a
//! (variant, language) pair, prepares the image and joins the recognized
//! lines.

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use super::backend::{EngineOptions, EngineSpec, OcrBackend, OptionKey};
use super::models::OcrModelStore;
use super::paddle::PaddleCliBackend;
use super::preprocess::{self, ResizePolicy};
use super::registry::{EngineEntry, EngineRegistry};
use super::tesseract::TesseractBackend;
use super::types::{BackendKind, EngineKey, ModelVariant, OcrError};
use crate::config::{default_threads, OcrSettings};

/// OCR front end used by the HTTP layer and the preloader
pub struct OcrService {
    registry: EngineRegistry,
    settings: OcrSettings,
}

impl OcrService {
    /// Build the backend chain described by the settings
    pub fn from_settings(settings: &OcrSettings) -> Self {
        let backends = settings
            .backends
            .iter()
            .map(|kind| -> Arc<dyn OcrBackend> {
                match kind {
                    BackendKind::Tesseract => {
                        Arc::new(TesseractBackend::new(settings.tesseract_bin.clone()))
                    }
                    BackendKind::PaddleOcr => Arc::new(PaddleCliBackend::new(
                        settings.paddleocr_bin.clone(),
                        settings.paddlex_home.clone(),
                    )),
                }
            })
            .collect();

        let registry = EngineRegistry::new(
            backends,
            OcrModelStore::new(&settings.paddlex_home),
            settings.auto_download,
        );
        Self::with_registry(settings.clone(), registry)
    }

    pub fn with_registry(settings: OcrSettings, registry: EngineRegistry) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn models(&self) -> &OcrModelStore {
        self.registry.models()
    }

    pub fn default_variant(&self) -> ModelVariant {
        self.settings.default_variant
    }

    /// Construction options for one engine
    pub fn engine_options(&self, key: &EngineKey) -> EngineOptions {
        let settings = &self.settings;
        EngineOptions::new()
            .with(OptionKey::Lang, &key.lang)
            .with(OptionKey::Device, if settings.use_gpu { "gpu" } else { "cpu" })
            .with(OptionKey::DetectionModel, key.variant.detection_model())
            .with(OptionKey::RecognitionModel, key.variant.recognition_model())
            .with(OptionKey::TextlineOrientation, settings.use_textline_orientation)
            .with(OptionKey::RecScoreThresh, settings.text_rec_score_thresh)
            .with(OptionKey::BoxThresh, settings.box_thresh)
            .with(OptionKey::UnclipRatio, settings.unclip_ratio)
            .with(OptionKey::CpuThreads, default_threads())
    }

    /// Make sure the engine for (variant, lang) is loaded
    pub async fn load(&self, variant: ModelVariant, lang: &str) -> Result<EngineEntry, OcrError> {
        let key = EngineKey::new(variant, lang);
        let options = self.engine_options(&key);
        self.registry.get_or_load(key, &options).await
    }

    /// Recognize text in an encoded image
    ///
    /// Images too small to read yield an empty string.
    pub async fn recognize(
        &self,
        image: Vec<u8>,
        variant: ModelVariant,
        lang: &str,
    ) -> Result<String, OcrError> {
        let policy = ResizePolicy {
            min_side_for_upscale: self.settings.min_side_for_upscale,
            max_side: self.settings.max_side,
        };
        let prepared = tokio::task::spawn_blocking(move || preprocess::prepare(&image, policy))
            .await
            .map_err(|e| OcrError::Recognition(format!("Image task failed: {}", e)))??;
        let Some(png) = prepared else {
            return Ok(String::new());
        };

        let entry = self.load(variant, lang).await?;
        let regions = entry.engine.recognize(&png).await?;

        let text = regions
            .iter()
            .map(|r| r.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text.trim().to_string())
    }

    /// Fetch the PaddleOCR weights for a variant
    ///
    /// Runs one recognition through the PaddleOCR CLI on a blank image, which
    /// makes PaddleX download any missing models into the cache home.
    pub async fn download_weights(&self, variant: ModelVariant) -> Result<(), OcrError> {
        let models = self.models();
        if models.is_downloaded(variant) {
            tracing::info!("OCR {} models already present", variant);
            return Ok(());
        }

        let started = Instant::now();
        tracing::info!(
            "Downloading OCR {} models to {}",
            variant,
            models.official_models_dir().display()
        );

        let backend =
            PaddleCliBackend::new(self.settings.paddleocr_bin.clone(), models.paddlex_home());
        let key = EngineKey::new(variant, "en");
        let (options, _) = self
            .engine_options(&key)
            .restricted_to(backend.supported_options());
        let spec = EngineSpec { key, options };
        let engine = backend
            .construct(&spec)
            .await
            .map_err(|e| OcrError::EngineUnavailable(format!("paddleocr: {}", e)))?;

        let blank = RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255]));
        engine.recognize(&preprocess::encode_png(&blank)?).await?;

        let missing = models.missing_models(variant);
        if !missing.is_empty() {
            return Err(OcrError::ModelMissing {
                path: models.official_models_dir(),
                models: missing,
            });
        }
        tracing::info!(
            "OCR {} models downloaded in {:.1}s",
            variant,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
