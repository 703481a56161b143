//! Typed service settings
//!
//! Derived once at startup from the merged configuration document plus
//! environment overrides. The service keeps this snapshot for its lifetime.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::ocr::{BackendKind, ModelVariant};
use crate::translate::{LoadParams, SamplingParams};

/// Settings consumed by the service
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub host: String,
    pub port: u16,
    /// Default source language (used for OCR preloading)
    pub source_lang: String,
    pub ocr: OcrSettings,
    pub translate: TranslateSettings,
    pub startup: StartupSettings,
    pub llm: LlmSettings,
}

/// OCR engine settings
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub default_variant: ModelVariant,
    pub auto_download: bool,
    pub use_gpu: bool,
    pub use_textline_orientation: bool,
    pub text_rec_score_thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub max_side: u32,
    pub min_side_for_upscale: u32,
    /// PaddleX cache home; weights live under `official_models/`
    pub paddlex_home: PathBuf,
    /// Backend adapters in the order they are tried
    pub backends: Vec<BackendKind>,
    pub preload: Vec<PreloadEntry>,
    pub tesseract_bin: String,
    pub paddleocr_bin: String,
}

/// Additional OCR engine to warm up at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadEntry {
    pub variant: ModelVariant,
    pub lang: String,
}

/// Translation model settings
#[derive(Debug, Clone)]
pub struct TranslateSettings {
    pub repo_id: String,
    pub quant: String,
    pub model_dir: PathBuf,
    /// Explicit model file (absolute path or name inside the repo)
    pub model_file: Option<String>,
    /// Whether the remote hub may be listed and downloaded from
    pub allow_remote: bool,
    pub hub_endpoint: String,
    pub llama_server_bin: String,
    pub load: LoadParams,
    pub sampling: SamplingParams,
    pub timeout: Duration,
}

/// Startup preloading flags
#[derive(Debug, Clone, Default)]
pub struct StartupSettings {
    pub auto_load_ocr: bool,
    pub auto_load_translator: bool,
}

/// LLM analysis backend credentials
#[derive(Debug, Clone, Default)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmSettings {
    /// Whether enough is configured to call the backend
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
            && !self.base_url.trim().is_empty()
            && !self.model.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDocument {
    source_lang: String,
    model_dir: String,
    paddleocr: RawPaddle,
    local_service: RawLocalService,
    unified_service: RawUnified,
    startup: RawStartup,
    llm: RawLlm,
}

impl Default for RawDocument {
    fn default() -> Self {
        Self {
            source_lang: "en".to_string(),
            model_dir: "models".to_string(),
            paddleocr: RawPaddle::default(),
            local_service: RawLocalService::default(),
            unified_service: RawUnified::default(),
            startup: RawStartup::default(),
            llm: RawLlm::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawPaddle {
    model_type: String,
    use_textline_orientation: bool,
    use_gpu: bool,
    auto_download: bool,
    text_rec_score_thresh: f32,
    box_thresh: f32,
    unclip_ratio: f32,
    max_side: u32,
    min_side_for_upscale: u32,
}

impl Default for RawPaddle {
    fn default() -> Self {
        Self {
            model_type: "mobile".to_string(),
            use_textline_orientation: true,
            use_gpu: false,
            auto_download: false,
            text_rec_score_thresh: 0.3,
            box_thresh: 0.3,
            unclip_ratio: 1.6,
            max_side: 1800,
            min_side_for_upscale: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLocalService {
    host: String,
    port: u16,
    model_repo: String,
    quant: String,
    allow_remote: bool,
}

impl Default for RawLocalService {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8092,
            model_repo: "tencent/HY-MT1.5-1.8B-GGUF".to_string(),
            quant: "Q6_K".to_string(),
            allow_remote: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawUnified {
    host: String,
    port: u16,
    preload_ocr: Vec<RawPreload>,
    ocr_backends: Vec<String>,
}

impl Default for RawUnified {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8092,
            preload_ocr: Vec::new(),
            ocr_backends: vec!["tesseract".to_string(), "paddleocr".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPreload {
    #[serde(default = "default_variant_name", rename = "type")]
    variant: String,
    #[serde(default = "default_lang")]
    lang: String,
}

fn default_variant_name() -> String {
    "mobile".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStartup {
    auto_load_ocr: bool,
    auto_load_translator: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLlm {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

impl ServiceSettings {
    /// Build settings from a merged configuration document
    ///
    /// Sections that fail to deserialize fall back to their defaults.
    pub fn from_document(document: &Value, root: &Path) -> Self {
        let raw: RawDocument = serde_json::from_value(document.clone()).unwrap_or_else(|e| {
            tracing::warn!("Config has unexpected value types ({}), using defaults", e);
            RawDocument::default()
        });
        Self::from_raw(raw, root)
    }

    fn from_raw(raw: RawDocument, root: &Path) -> Self {
        let model_dir = env::var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| resolve_path(root, &raw.model_dir));

        let paddlex_home = env::var("PADDLE_PDX_CACHE_HOME")
            .or_else(|_| env::var("PADDLEX_HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join("paddlex"));

        let backends = raw
            .unified_service
            .ocr_backends
            .iter()
            .filter_map(|name| match BackendKind::from_str(name) {
                Ok(kind) => Some(kind),
                Err(_) => {
                    tracing::warn!("Unknown OCR backend '{}' in config, skipping", name);
                    None
                }
            })
            .collect();

        let preload = raw
            .unified_service
            .preload_ocr
            .iter()
            .filter_map(|entry| match ModelVariant::from_str(&entry.variant) {
                Ok(variant) => Some(PreloadEntry {
                    variant,
                    lang: entry.lang.clone(),
                }),
                Err(_) => {
                    tracing::warn!("Unknown OCR preload variant '{}', skipping", entry.variant);
                    None
                }
            })
            .collect();

        let default_variant =
            ModelVariant::from_str(&raw.paddleocr.model_type).unwrap_or_default();

        let ocr = OcrSettings {
            default_variant,
            auto_download: raw.paddleocr.auto_download,
            use_gpu: raw.paddleocr.use_gpu,
            use_textline_orientation: raw.paddleocr.use_textline_orientation,
            text_rec_score_thresh: raw.paddleocr.text_rec_score_thresh,
            box_thresh: raw.paddleocr.box_thresh,
            unclip_ratio: raw.paddleocr.unclip_ratio,
            max_side: raw.paddleocr.max_side.max(32),
            min_side_for_upscale: raw.paddleocr.min_side_for_upscale,
            paddlex_home,
            backends,
            preload,
            tesseract_bin: env_string("TESSERACT_BIN").unwrap_or_else(|| "tesseract".to_string()),
            paddleocr_bin: env_string("PADDLEOCR_BIN").unwrap_or_else(|| "paddleocr".to_string()),
        };

        let load = LoadParams {
            n_ctx: env_parse("N_CTX").unwrap_or(4096),
            n_threads: env_parse("N_THREADS").unwrap_or_else(default_threads),
            n_batch: env_parse("N_BATCH").unwrap_or(128),
        };

        let defaults = SamplingParams::default();
        let sampling = SamplingParams {
            max_tokens: env_parse("MAX_NEW_TOKENS").unwrap_or(defaults.max_tokens),
            temperature: env_parse("TEMPERATURE").unwrap_or(defaults.temperature),
            top_p: env_parse("TOP_P").unwrap_or(defaults.top_p),
            top_k: env_parse("TOP_K").unwrap_or(defaults.top_k),
            repeat_penalty: env_parse("REPEAT_PENALTY").unwrap_or(defaults.repeat_penalty),
        };

        let translate = TranslateSettings {
            repo_id: env_string("MODEL_REPO").unwrap_or(raw.local_service.model_repo),
            quant: env_string("QUANT").unwrap_or(raw.local_service.quant),
            model_dir,
            model_file: env_string("MODEL_FILE"),
            allow_remote: raw.local_service.allow_remote,
            hub_endpoint: env_string("HF_ENDPOINT")
                .unwrap_or_else(|| "https://huggingface.co".to_string()),
            llama_server_bin: env_string("LLAMA_SERVER_BIN")
                .unwrap_or_else(|| "llama-server".to_string()),
            load,
            sampling,
            timeout: Duration::from_secs(env_parse("TRANSLATE_TIMEOUT").unwrap_or(60)),
        };

        Self {
            host: env_string("HOST").unwrap_or(raw.unified_service.host),
            port: env_parse("PORT").unwrap_or(raw.unified_service.port),
            source_lang: raw.source_lang,
            ocr,
            translate,
            startup: StartupSettings {
                auto_load_ocr: raw.startup.auto_load_ocr,
                auto_load_translator: raw.startup.auto_load_translator,
            },
            llm: LlmSettings {
                api_key: raw.llm.api_key,
                base_url: raw.llm.base_url,
                model: raw.llm.model,
                max_tokens: raw.llm.max_tokens,
                temperature: raw.llm.temperature,
            },
        }
    }
}

/// Worker threads for CPU inference: all cores but one
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

fn resolve_path(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_document;
    use serde_json::json;

    #[test]
    fn test_defaults_map_to_settings() {
        let settings = ServiceSettings::from_document(&default_document(), Path::new("/srv/rsta"));

        assert_eq!(settings.ocr.default_variant, ModelVariant::Mobile);
        assert_eq!(settings.ocr.max_side, 1800);
        assert_eq!(settings.ocr.min_side_for_upscale, 100);
        assert_eq!(
            settings.ocr.backends,
            vec![BackendKind::Tesseract, BackendKind::PaddleOcr]
        );
        assert!(!settings.startup.auto_load_ocr);
        assert!(!settings.llm.is_configured());
        assert!(settings.translate.load.n_threads >= 1);
    }

    #[test]
    fn test_preload_entries_and_unknown_backends() {
        let mut doc = default_document();
        crate::config::merge(
            &mut doc,
            &json!({
                "unified_service": {
                    "preload_ocr": [{"type": "server", "lang": "ja"}, {"type": "huge"}],
                    "ocr_backends": ["paddleocr", "nonsense"]
                }
            }),
        );

        let settings = ServiceSettings::from_document(&doc, Path::new("."));
        assert_eq!(
            settings.ocr.preload,
            vec![PreloadEntry {
                variant: ModelVariant::Server,
                lang: "ja".to_string()
            }]
        );
        assert_eq!(settings.ocr.backends, vec![BackendKind::PaddleOcr]);
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let doc = json!({"paddleocr": {"max_side": "big"}});
        let settings = ServiceSettings::from_document(&doc, Path::new("."));
        assert_eq!(settings.ocr.max_side, 1800);
    }
}
