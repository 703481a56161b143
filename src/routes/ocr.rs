//! OCR endpoints

use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{LoadingKind, Result, ServiceError};
use crate::ocr::{EngineKey, ModelVariant};
use crate::state::AppState;

/// Longest slice of a rejected payload echoed back to the caller
const PREVIEW_CHARS: usize = 50;

/// Request body cap; base64 full-screen captures run to several MiB
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct OcrRequest {
    pub image: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub text: String,
    pub model_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Debug, Serialize)]
pub struct PreloadResponse {
    pub status: &'static str,
    pub cache_key: String,
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_model_type() -> String {
    "mobile".to_string()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ocr", post(ocr))
        .route("/ocr/preload", post(preload))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Decode the base64 payload, rejecting it with a short preview
fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    STANDARD.decode(encoded.trim()).map_err(|e| {
        let preview: String = encoded.chars().take(PREVIEW_CHARS).collect();
        ServiceError::InvalidInput(format!("Invalid base64 image: {}. Preview: {}...", e, preview))
    })
}

async fn ocr(
    State(state): State<AppState>,
    Json(request): Json<OcrRequest>,
) -> Result<Json<OcrResponse>> {
    let started = Instant::now();

    if state.status().is_loading(LoadingKind::Ocr) {
        return Err(ServiceError::Loading(LoadingKind::Ocr));
    }

    let image = decode_image(&request.image)?;
    let variant: ModelVariant = request.model_type.parse()?;

    let text = state.ocr().recognize(image, variant, &request.lang).await?;

    tracing::info!(
        "[OCR] {}ms | lang={} | {} chars",
        started.elapsed().as_millis(),
        request.lang,
        text.chars().count()
    );

    Ok(Json(OcrResponse {
        text,
        model_type: request.model_type,
    }))
}

async fn preload(
    State(state): State<AppState>,
    Json(request): Json<PreloadRequest>,
) -> Result<Json<PreloadResponse>> {
    let variant: ModelVariant = request.model_type.parse()?;
    let key = EngineKey::new(variant, &request.lang);
    let cache_key = key.to_string();

    if state.ocr().registry().contains(&key) {
        return Ok(Json(PreloadResponse {
            status: "already_loaded",
            cache_key,
        }));
    }

    let started = Instant::now();
    state.ocr().load(variant, &request.lang).await?;
    tracing::info!(
        "OCR engine {} preloaded in {:.2}s",
        cache_key,
        started.elapsed().as_secs_f64()
    );

    Ok(Json(PreloadResponse {
        status: "loaded",
        cache_key,
    }))
}
