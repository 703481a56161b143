//! Health and loading status endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ocr_loaded: Vec<String>,
    pub translate_repo: Option<String>,
    pub translate_file: Option<String>,
    pub translate_available: bool,
    pub translate_backend: Option<&'static str>,
}

#[derive(Serialize)]
pub struct LoadingStatusResponse {
    pub ocr: OcrLoading,
    pub translate: TranslateLoading,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct OcrLoading {
    pub loading: bool,
    pub ready: bool,
    pub loaded_models: Vec<String>,
}

#[derive(Serialize)]
pub struct TranslateLoading {
    pub loading: bool,
    pub ready: bool,
    pub model_file: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/loading_status", get(loading_status))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let translator = state.translator();
    let handle = translator.handle();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ocr_loaded: state.ocr().registry().loaded_keys(),
        translate_repo: handle.as_ref().map(|h| h.repo_id.clone()),
        translate_file: handle.as_ref().map(|h| h.file_name.clone()),
        translate_available: handle.is_some(),
        translate_backend: handle.as_ref().map(|_| translator.loader_name()),
    })
}

pub async fn loading_status(State(state): State<AppState>) -> Json<LoadingStatusResponse> {
    let status = state.status().snapshot();
    let registry = state.ocr().registry();
    let handle = state.translator().handle();

    Json(LoadingStatusResponse {
        ocr: OcrLoading {
            loading: status.ocr_loading,
            ready: status.ocr_ready || !registry.is_empty(),
            loaded_models: registry.loaded_keys(),
        },
        translate: TranslateLoading {
            loading: status.translate_loading,
            ready: status.translate_ready || handle.is_some(),
            model_file: handle.map(|h| h.file_name.clone()),
        },
        error: status.last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::app;
    use crate::routes::test_support::{body_json, get};
    use crate::testing::{state_with, state_with_model, CountingBackend, InstrumentedModel, Outcome};
    use crate::ocr::BackendKind;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_before_any_load() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Ready));
        let state = state_with(dir.path(), backend, |_| {});

        let response = app(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ocr_loaded"], serde_json::json!([]));
        assert_eq!(body["translate_available"], false);
        assert!(body["translate_backend"].is_null());
    }

    #[tokio::test]
    async fn test_health_reports_loaded_translator() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Ready));
        let state = state_with_model(dir.path(), backend, Arc::new(InstrumentedModel::new()), |_| {});
        assert!(state.translator().ensure_loaded().await.unwrap());

        let body = body_json(app(state).oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(body["translate_available"], true);
        assert_eq!(body["translate_file"], "HY-MT1.5-1.8B-Q6_K.gguf");
        assert_eq!(body["translate_repo"], "tencent/HY-MT1.5-1.8B-GGUF");
        assert_eq!(body["translate_backend"], "fake");
    }

    #[tokio::test]
    async fn test_loading_status_tracks_preload() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(
            CountingBackend::new(BackendKind::Tesseract, Outcome::Ready)
                .with_delay(Duration::from_millis(150)),
        );
        let state = state_with(dir.path(), backend, |s| s.startup.auto_load_ocr = true);
        let router = app(state.clone());

        let handle = crate::preload::spawn(&state).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let during = body_json(router.clone().oneshot(get("/loading_status")).await.unwrap()).await;
        assert_eq!(during["ocr"]["loading"], true);
        assert_eq!(during["ocr"]["ready"], false);

        handle.await.unwrap();
        let after = body_json(router.oneshot(get("/loading_status")).await.unwrap()).await;
        assert_eq!(after["ocr"]["loading"], false);
        assert_eq!(after["ocr"]["ready"], true);
        assert_eq!(after["ocr"]["loaded_models"], serde_json::json!(["mobile_en"]));
        assert!(after["error"].is_null());
    }

    #[tokio::test]
    async fn test_loading_status_after_failed_preload() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Fatal));
        let state = state_with(dir.path(), backend, |s| s.startup.auto_load_ocr = true);

        crate::preload::run(&state).await;
        let body = body_json(app(state).oneshot(get("/loading_status")).await.unwrap()).await;
        assert_eq!(body["ocr"]["loading"], false);
        assert_eq!(body["ocr"]["ready"], false);
        assert!(body["error"].is_string());
    }
}
