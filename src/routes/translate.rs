//! Translation endpoints

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::error::{LoadingKind, Result, ServiceError};
use crate::lang;
use crate::sse;
use crate::state::AppState;
use crate::translate::TranslateError;

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_target")]
    pub target: String,
}

impl TranslateRequest {
    /// `q` wins over `text`, both trimmed
    fn input(&self) -> &str {
        self.q
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
            .trim()
    }
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    #[serde(rename = "translatedText")]
    pub translated_text: String,
}

fn default_source() -> String {
    "en".to_string()
}

fn default_target() -> String {
    "zh".to_string()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/translate", post(translate))
        .route("/translate_stream", post(translate_stream))
}

/// Shared pre-checks; returns the prompt to run
async fn prepare(state: &AppState, request: &TranslateRequest) -> Result<String> {
    let text = request.input();
    if text.is_empty() {
        return Err(ServiceError::InvalidInput("Empty text".to_string()));
    }
    if state.status().is_loading(LoadingKind::Translate) {
        return Err(ServiceError::Loading(LoadingKind::Translate));
    }
    if !state.translator().ensure_loaded().await? {
        return Err(TranslateError::Unresolved.into());
    }
    Ok(lang::build_translate_prompt(&request.source, &request.target, text))
}

async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>> {
    let prompt = prepare(&state, &request).await?;

    let started = Instant::now();
    let translated = state.translator().translate(&prompt).await?;
    let translated = translated.trim().to_string();

    tracing::info!(
        "[Translate] {:.2}s | {}->{} | {} chars -> {} chars",
        started.elapsed().as_secs_f64(),
        request.source,
        request.target,
        request.input().chars().count(),
        translated.chars().count()
    );

    Ok(Json(TranslateResponse {
        translated_text: translated,
    }))
}

async fn translate_stream(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let prompt = prepare(&state, &request).await?;
    let rx = state.translator().translate_stream(&prompt).await?;
    tracing::debug!("[Translate] streaming {}->{}", request.source, request.target);

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    });

    Ok(Sse::new(sse::token_frames(events)).keep_alive(KeepAlive::default()))
}
