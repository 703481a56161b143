//! Test doubles shared by unit and router tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::config::{ConfigStore, OcrSettings, ServiceSettings, TranslateSettings};
use crate::logging::LogBuffer;
use crate::ocr::{
    BackendKind, ConstructError, EngineOptions, EngineRegistry, EngineSpec, ModelVariant,
    OcrBackend, OcrEngine, OcrError, OcrModelStore, OcrService, OptionKey, TextRegion,
};
use crate::sse::{TokenEvent, TokenStream};
use crate::state::AppState;
use crate::translate::{
    CompletionModel, LoadParams, ModelError, ModelLoader, SamplingParams, TranslationModelSlot,
};

const ALL_OPTIONS: &[OptionKey] = &[
    OptionKey::Lang,
    OptionKey::Device,
    OptionKey::DetectionModel,
    OptionKey::RecognitionModel,
    OptionKey::TextlineOrientation,
    OptionKey::RecScoreThresh,
    OptionKey::BoxThresh,
    OptionKey::UnclipRatio,
    OptionKey::CpuThreads,
];

/// What a [`CountingBackend`] does when asked to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Unavailable,
    Fatal,
}

/// OCR backend that counts construction attempts
pub struct CountingBackend {
    kind: BackendKind,
    outcome: Outcome,
    delay: Duration,
    weights: bool,
    options: &'static [OptionKey],
    lines: Vec<String>,
    attempts: AtomicUsize,
    constructions: AtomicUsize,
    last_options: Mutex<Option<EngineOptions>>,
}

impl CountingBackend {
    pub fn new(kind: BackendKind, outcome: Outcome) -> Self {
        Self {
            kind,
            outcome,
            delay: Duration::ZERO,
            weights: false,
            options: ALL_OPTIONS,
            lines: vec!["hello".to_string()],
            attempts: AtomicUsize::new(0),
            constructions: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requiring_weights(mut self) -> Self {
        self.weights = true;
        self
    }

    pub fn accepting(mut self, options: &'static [OptionKey]) -> Self {
        self.options = options;
        self
    }

    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<EngineOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl OcrBackend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supported_options(&self) -> &'static [OptionKey] {
        self.options
    }

    fn requires_weights(&self) -> bool {
        self.weights
    }

    async fn construct(&self, spec: &EngineSpec) -> Result<Arc<dyn OcrEngine>, ConstructError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(spec.options.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.outcome {
            Outcome::Ready => {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeEngine {
                    kind: self.kind,
                    lines: self.lines.clone(),
                }))
            }
            Outcome::Unavailable => Err(ConstructError::Unavailable("not installed".to_string())),
            Outcome::Fatal => Err(ConstructError::Fatal("weights are corrupt".to_string())),
        }
    }
}

/// Engine returning fixed lines for any image
pub struct FakeEngine {
    kind: BackendKind,
    lines: Vec<String>,
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    async fn recognize(&self, _png: &[u8]) -> Result<Vec<TextRegion>, OcrError> {
        Ok(self.lines.iter().map(TextRegion::new).collect())
    }
}

pub fn ocr_settings(paddlex_home: &Path) -> OcrSettings {
    OcrSettings {
        default_variant: ModelVariant::Mobile,
        auto_download: false,
        use_gpu: false,
        use_textline_orientation: true,
        text_rec_score_thresh: 0.3,
        box_thresh: 0.3,
        unclip_ratio: 1.6,
        max_side: 1800,
        min_side_for_upscale: 100,
        paddlex_home: paddlex_home.to_path_buf(),
        backends: vec![BackendKind::Tesseract],
        preload: Vec::new(),
        tesseract_bin: "tesseract".to_string(),
        paddleocr_bin: "paddleocr".to_string(),
    }
}

pub fn translate_settings(model_dir: &Path) -> TranslateSettings {
    TranslateSettings {
        repo_id: "tencent/HY-MT1.5-1.8B-GGUF".to_string(),
        quant: "Q6_K".to_string(),
        model_dir: model_dir.to_path_buf(),
        model_file: None,
        allow_remote: false,
        hub_endpoint: "http://127.0.0.1:9".to_string(),
        llama_server_bin: "llama-server".to_string(),
        load: LoadParams::default(),
        sampling: SamplingParams::default(),
        timeout: Duration::from_secs(5),
    }
}

/// Completion model that tracks concurrent use
pub struct InstrumentedModel {
    delay: Duration,
    stream_tokens: Option<usize>,
    reply: String,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    stream_dropped: Arc<AtomicBool>,
}

impl InstrumentedModel {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            stream_tokens: Some(3),
            reply: "你好".to_string(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `None` streams forever
    pub fn with_stream_tokens(mut self, tokens: Option<usize>) -> Self {
        self.stream_tokens = tokens;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }
}

/// Sets a flag when the token stream is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionModel for InstrumentedModel {
    async fn complete(&self, _prompt: &str, _params: &SamplingParams) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    async fn complete_stream(
        &self,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<TokenStream, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let limit = self.stream_tokens;
        let flag = DropFlag(self.stream_dropped.clone());
        let tokens = stream::unfold((0usize, flag), move |(n, flag)| async move {
            if limit.map(|l| n >= l).unwrap_or(false) {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((TokenEvent::Token(format!("t{}", n)), (n + 1, flag)))
        });
        Ok(tokens.boxed())
    }
}

/// Loader handing out one shared model
pub struct FakeLoader {
    model: Arc<InstrumentedModel>,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub fn new(model: Arc<InstrumentedModel>) -> Self {
        Self {
            model,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn load(
        &self,
        _path: &Path,
        _params: &LoadParams,
    ) -> Result<Arc<dyn CompletionModel>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.model.clone())
    }
}

/// App state over `dir` with one fake OCR backend and no translation model
pub fn state_with<F>(dir: &Path, backend: Arc<CountingBackend>, configure: F) -> AppState
where
    F: FnOnce(&mut ServiceSettings),
{
    build_state(dir, backend, Arc::new(InstrumentedModel::new()), configure)
}

/// Like [`state_with`], with a translation model file present
pub fn state_with_model<F>(
    dir: &Path,
    backend: Arc<CountingBackend>,
    model: Arc<InstrumentedModel>,
    configure: F,
) -> AppState
where
    F: FnOnce(&mut ServiceSettings),
{
    let models = dir.join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("HY-MT1.5-1.8B-Q6_K.gguf"), b"gguf").unwrap();
    build_state(dir, backend, model, configure)
}

fn build_state<F>(
    dir: &Path,
    backend: Arc<CountingBackend>,
    model: Arc<InstrumentedModel>,
    configure: F,
) -> AppState
where
    F: FnOnce(&mut ServiceSettings),
{
    let config = ConfigStore::new(dir.join("config.json"));
    let mut settings = config.settings();
    let paddlex_home = dir.join("paddlex");
    settings.ocr = ocr_settings(&paddlex_home);
    settings.translate = translate_settings(&dir.join("models"));
    configure(&mut settings);

    let registry = EngineRegistry::new(
        vec![backend as Arc<dyn OcrBackend>],
        OcrModelStore::new(&settings.ocr.paddlex_home),
        settings.ocr.auto_download,
    );
    let ocr = OcrService::with_registry(settings.ocr.clone(), registry);
    let translator = TranslationModelSlot::new(&settings.translate, Arc::new(FakeLoader::new(model)));

    AppState::from_parts(config, settings, ocr, translator, Arc::new(LogBuffer::new(100)))
}
