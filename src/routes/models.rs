//! Model inventory and download endpoints

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, ServiceError};
use crate::ocr::{ModelVariant, OcrModelStatus};
use crate::sse::{progress_event, Progress, ProgressStatus};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub ocr_models: Vec<&'static str>,
    pub ocr_loaded: Vec<String>,
    pub translate_model: Option<String>,
}

#[derive(Serialize)]
pub struct ModelsStatusResponse {
    pub ocr: OcrModelStatus,
    pub translate: TranslateModelStatus,
}

#[derive(Serialize)]
pub struct TranslateModelStatus {
    pub downloaded: bool,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub model_type: String,
    #[serde(default)]
    pub ocr_model_type: Option<String>,
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadStreamQuery {
    pub model_type: String,
    #[serde(default)]
    pub ocr_model_type: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/status", get(models_status))
        .route("/models/download", post(download))
        .route("/models/download_stream", get(download_stream))
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        ocr_models: ModelVariant::ALL.iter().map(|v| v.as_str()).collect(),
        ocr_loaded: state.ocr().registry().loaded_keys(),
        translate_model: state.translator().handle().map(|h| h.file_name.clone()),
    })
}

async fn models_status(State(state): State<AppState>) -> Json<ModelsStatusResponse> {
    let path = state.translator().resolver().any_local();
    Json(ModelsStatusResponse {
        ocr: state.ocr().models().status(),
        translate: TranslateModelStatus {
            downloaded: path.is_some(),
            path: path.map(|p| p.display().to_string()),
        },
    })
}

fn ocr_variant(state: &AppState, requested: Option<&str>) -> Result<ModelVariant> {
    match requested {
        Some(name) => Ok(name.parse::<ModelVariant>()?),
        None => Ok(state.ocr().default_variant()),
    }
}

async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>> {
    let message = match request.model_type.as_str() {
        "ocr" => {
            let variant = ocr_variant(&state, request.ocr_model_type.as_deref())?;
            state.ocr().download_weights(variant).await.map_err(|e| {
                ServiceError::Internal(format!("OCR model download failed: {}", e))
            })?;
            format!("OCR {} models downloaded", variant.label())
        }
        "translate" => {
            let resolver = state.translator().resolver();
            let fetched = async {
                let file_name = resolver.select_remote().await?;
                resolver.fetch(&file_name, |_, _| {}).await
            }
            .await
            .map_err(|e| {
                ServiceError::Internal(format!("Translation model download failed: {}", e))
            })?;
            format!("Translation model downloaded: {}", fetched.file_name)
        }
        other => {
            return Err(ServiceError::InvalidInput(format!(
                "Unknown model type: {}",
                other
            )))
        }
    };

    tracing::info!("{}", message);
    Ok(Json(DownloadResponse {
        status: "ok",
        message,
    }))
}

async fn download_stream(
    State(state): State<AppState>,
    Query(query): Query<DownloadStreamQuery>,
) -> Sse<BoxStream<'static, std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Progress>(16);

    match query.model_type.as_str() {
        "ocr" => {
            let variant = ocr_variant(&state, query.ocr_model_type.as_deref());
            tokio::spawn(async move {
                match variant {
                    Ok(variant) => download_ocr(state, variant, tx).await,
                    Err(e) => {
                        let _ = tx.send(Progress::error(e.to_string())).await;
                    }
                }
            });
        }
        "translate" => {
            tokio::spawn(download_translate(state, tx));
        }
        other => {
            let _ = tx.try_send(Progress::error(format!("Unknown model type: {}", other)));
        }
    }

    let frames = stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let progress = rx.recv().await?;
        let finished = progress.status != ProgressStatus::Downloading;
        Some((Ok(progress_event(&progress)), (rx, finished)))
    })
    .boxed();

    Sse::new(frames).keep_alive(KeepAlive::default())
}

async fn download_ocr(state: AppState, variant: ModelVariant, tx: mpsc::Sender<Progress>) {
    let label = variant.label();
    let _ = tx
        .send(Progress::downloading(0, format!("Initializing OCR ({})...", label)))
        .await;
    let _ = tx
        .send(Progress::downloading(10, "Checking model files..."))
        .await;
    let _ = tx
        .send(Progress::downloading(
            20,
            format!("Downloading OCR {} models (this may take a few minutes)...", label),
        ))
        .await;

    let progress = match state.ocr().download_weights(variant).await {
        Ok(()) => {
            tracing::info!("OCR {} models downloaded", label);
            Progress::done("OCR models downloaded")
        }
        Err(e) => {
            tracing::error!("OCR model download failed: {}", e);
            Progress::error(format!("Download failed: {}", e))
        }
    };
    let _ = tx.send(progress).await;
}

async fn download_translate(state: AppState, tx: mpsc::Sender<Progress>) {
    let resolver = state.translator().resolver();
    let _ = tx.send(Progress::downloading(0, "Initializing...")).await;
    let _ = tx
        .send(Progress::downloading(
            5,
            format!("Fetching model list (quantization: {})...", resolver.quant()),
        ))
        .await;

    let file_name = match resolver.select_remote().await {
        Ok(name) => name,
        Err(e) => {
            tracing::error!("Translation model download failed: {}", e);
            let _ = tx.send(Progress::error(e.to_string())).await;
            return;
        }
    };

    if resolver.model_dir().join(&file_name).is_file() {
        let _ = tx
            .send(Progress::done(format!("Model already present: {}", file_name)))
            .await;
        return;
    }

    let _ = tx
        .send(Progress::downloading(10, format!("Downloading: {}", file_name)))
        .await;

    let progress_tx = tx.clone();
    let progress_name = file_name.clone();
    let mut last_percent = 10u8;
    let result = resolver
        .fetch(&file_name, move |written, total| {
            let Some(total) = total.filter(|t| *t > 0) else {
                return;
            };
            let percent = download_percent(written, total);
            if percent > last_percent {
                last_percent = percent;
                let message = format!("Downloading: {} ({}%)", progress_name, percent);
                let _ = progress_tx.try_send(Progress::downloading(percent, message));
            }
        })
        .await;

    let progress = match result {
        Ok(resolved) => {
            tracing::info!("Translation model downloaded: {}", resolved.file_name);
            Progress::done(format!("Translation model downloaded: {}", resolved.file_name))
        }
        Err(e) => {
            tracing::error!("Translation model download failed: {}", e);
            Progress::error(format!("Download failed: {}", e))
        }
    };
    let _ = tx.send(progress).await;
}

/// Map downloaded bytes onto the 10..=99 progress range
fn download_percent(written: u64, total: u64) -> u8 {
    let fraction = written.min(total) as f64 / total as f64;
    (10.0 + fraction * 89.0).floor() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::BackendKind;
    use crate::routes::app;
    use crate::routes::test_support::{body_json, body_text, data_lines, get, post_json};
    use crate::testing::{state_with, state_with_model, CountingBackend, InstrumentedModel, Outcome};
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn backend() -> Arc<CountingBackend> {
        Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Ready))
    }

    #[test]
    fn test_download_percent_range() {
        assert_eq!(download_percent(0, 100), 10);
        assert_eq!(download_percent(50, 100), 54);
        assert_eq!(download_percent(100, 100), 99);
        assert_eq!(download_percent(500, 100), 99);
    }

    #[tokio::test]
    async fn test_list_models() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        state.ocr().load(ModelVariant::Server, "ja").await.unwrap();

        let body = body_json(app(state).oneshot(get("/models")).await.unwrap()).await;
        assert_eq!(body["ocr_models"], json!(["mobile", "server"]));
        assert_eq!(body["ocr_loaded"], json!(["server_ja"]));
        assert!(body["translate_model"].is_null());
    }

    #[tokio::test]
    async fn test_models_status_reports_local_files() {
        let dir = TempDir::new().unwrap();
        let state = state_with_model(dir.path(), backend(), Arc::new(InstrumentedModel::new()), |_| {});
        let det = dir.path().join("paddlex/official_models/PP-OCRv5_mobile_det");
        let rec = dir.path().join("paddlex/official_models/PP-OCRv5_mobile_rec");
        for model in [&det, &rec] {
            std::fs::create_dir_all(model).unwrap();
            std::fs::write(model.join("inference.pdiparams"), b"w").unwrap();
        }

        let body = body_json(app(state).oneshot(get("/models/status")).await.unwrap()).await;
        assert_eq!(body["ocr"]["mobile_downloaded"], true);
        assert_eq!(body["ocr"]["server_downloaded"], false);
        assert_eq!(body["translate"]["downloaded"], true);
        assert!(body["translate"]["path"]
            .as_str()
            .unwrap()
            .ends_with("HY-MT1.5-1.8B-Q6_K.gguf"));
    }

    #[tokio::test]
    async fn test_download_unknown_type_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        let response = app(state)
            .oneshot(post_json("/models/download", json!({"model_type": "voice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_translate_failure_is_500() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        let response = app(state)
            .oneshot(post_json("/models/download", json!({"model_type": "translate"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Translation model download failed"));
    }

    #[tokio::test]
    async fn test_download_stream_unknown_type_sends_error_frame() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        let response = app(state)
            .oneshot(get("/models/download_stream?model_type=voice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let frames = data_lines(&body_text(response).await);
        assert_eq!(frames.len(), 1);
        let frame: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["status"], "error");
        assert_eq!(frame["percent"], 0);
    }

    #[tokio::test]
    async fn test_download_stream_translate_unreachable_hub() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        let response = app(state)
            .oneshot(get("/models/download_stream?model_type=translate"))
            .await
            .unwrap();

        let frames: Vec<Value> = data_lines(&body_text(response).await)
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect();
        assert_eq!(frames.first().unwrap()["status"], "downloading");
        assert_eq!(frames.last().unwrap()["status"], "error");
    }
}
