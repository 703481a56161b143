//! Startup model warm-up

use tokio::task::JoinHandle;

use crate::ocr::EngineKey;
use crate::state::AppState;

/// Spawn the warm-up task if any auto-load flag is set
///
/// The task runs in the background; the server accepts requests while it
/// loads. Handlers answer 503 while the relevant loading flag is set.
pub fn spawn(state: &AppState) -> Option<JoinHandle<()>> {
    let startup = &state.settings().startup;
    if !startup.auto_load_ocr && !startup.auto_load_translator {
        tracing::info!("Model preloading disabled, models load on first use");
        return None;
    }

    let state = state.clone();
    Some(tokio::spawn(async move { run(&state).await }))
}

/// Load the configured models in order
pub async fn run(state: &AppState) {
    let startup = &state.settings().startup;
    if startup.auto_load_ocr {
        preload_ocr(state).await;
    }
    if startup.auto_load_translator {
        preload_translator(state).await;
    }
}

async fn preload_ocr(state: &AppState) {
    let settings = state.settings();
    let ocr = state.ocr();
    let guard = state.status().begin_ocr();

    let variant = ocr.default_variant();
    tracing::info!("Preloading OCR {} ({})", variant, settings.source_lang);
    let default_error = match ocr.load(variant, &settings.source_lang).await {
        Ok(_) => None,
        Err(e) => {
            tracing::error!("OCR preload failed: {}", e);
            let message = format!("OCR load failed: {}", e);
            state.status().record_error(message.clone());
            Some(message)
        }
    };

    // Additional engines are tried even when the default one failed
    for entry in &settings.ocr.preload {
        let key = EngineKey::new(entry.variant, &entry.lang);
        if ocr.registry().contains(&key) {
            continue;
        }
        tracing::info!("Preloading additional OCR engine {}", key);
        if let Err(e) = ocr.load(entry.variant, &entry.lang).await {
            tracing::warn!("Preloading OCR engine {} failed: {}", key, e);
        }
    }

    match default_error {
        None => guard.succeed(),
        Some(message) => guard.fail(message),
    }
}

async fn preload_translator(state: &AppState) {
    let guard = state.status().begin_translate();
    tracing::info!("Preloading translation model");

    match state.translator().ensure_loaded().await {
        Ok(true) => guard.succeed(),
        Ok(false) => {
            tracing::warn!("Translation model not found, download it from the settings page");
            guard.fail("Translation model not found");
        }
        Err(e) => {
            tracing::error!("Translation model preload failed: {}", e);
            guard.fail(format!("Translation model load failed: {}", e));
        }
    }
}

/// Log which models are present on disk
pub fn log_model_summary(state: &AppState) {
    let ocr = state.ocr().models().status();
    tracing::info!(
        "OCR models: mobile={} server={} ({})",
        ocr.mobile_downloaded,
        ocr.server_downloaded,
        state.ocr().models().official_models_dir().display()
    );

    let resolver = state.translator().resolver();
    match resolver.find_local() {
        Some(path) => tracing::info!("Translation model: {}", path.display()),
        None => tracing::info!(
            "Translation model: none matching {} under {}",
            resolver.quant(),
            resolver.model_dir().display()
        ),
    }
}
