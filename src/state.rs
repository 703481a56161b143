//! Application state management

use std::sync::Arc;

use crate::config::{ConfigStore, ServiceSettings};
use crate::logging::LogBuffer;
use crate::ocr::OcrService;
use crate::status::LoadingStatusTracker;
use crate::translate::TranslationModelSlot;

/// Shared application state
///
/// One instance per process; handlers receive cheap clones.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ConfigStore,
    settings: ServiceSettings,
    ocr: OcrService,
    translator: TranslationModelSlot,
    status: LoadingStatusTracker,
    logs: Arc<LogBuffer>,
}

impl AppState {
    /// Build the services from the configuration snapshot
    pub fn new(config: ConfigStore, logs: Arc<LogBuffer>) -> Self {
        let settings = config.settings();
        let ocr = OcrService::from_settings(&settings.ocr);
        let translator = TranslationModelSlot::from_settings(&settings.translate);
        Self::from_parts(config, settings, ocr, translator, logs)
    }

    pub fn from_parts(
        config: ConfigStore,
        settings: ServiceSettings,
        ocr: OcrService,
        translator: TranslationModelSlot,
        logs: Arc<LogBuffer>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                settings,
                ocr,
                translator,
                status: LoadingStatusTracker::new(),
                logs,
            }),
        }
    }

    /// Persisted configuration store
    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    /// Settings snapshot taken at startup
    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }

    pub fn ocr(&self) -> &OcrService {
        &self.inner.ocr
    }

    pub fn translator(&self) -> &TranslationModelSlot {
        &self.inner.translator
    }

    pub fn status(&self) -> &LoadingStatusTracker {
        &self.inner.status
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.inner.logs
    }
}
