//! LLM analysis endpoint

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{Result, ServiceError};
use crate::lang;
use crate::llm::{ChatMessage, LlmClient};
use crate::sse::{self, TokenEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_source")]
    pub source_lang: String,
    #[serde(default = "default_target")]
    pub target_lang: String,
}

fn default_source() -> String {
    "en".to_string()
}

fn default_target() -> String {
    "zh".to_string()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ServiceError::InvalidInput("Empty text".to_string()));
    }

    // Credentials can change at runtime through POST /config
    let llm = state.config().settings().llm;
    if !llm.is_configured() {
        return Err(ServiceError::MissingCredentials(
            "set llm.api_key, llm.base_url and llm.model in the settings".to_string(),
        ));
    }

    let client = LlmClient::new(&llm).map_err(|e| ServiceError::Internal(e.to_string()))?;
    let prompt = lang::build_analyze_prompt(text, &request.source_lang, &request.target_lang);
    tracing::info!(
        "[Analyze] {} chars via {} ({})",
        text.chars().count(),
        llm.model.trim(),
        client.endpoint()
    );

    let messages = vec![ChatMessage::user(prompt)];
    let events = stream::once(async move { client.stream_chat(&messages).await })
        .flat_map(|result| match result {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("[Analyze] upstream failed: {}", e);
                stream::once(async move { TokenEvent::Error(e.to_string()) }).boxed()
            }
        });

    Ok(Sse::new(sse::token_frames(events)).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use crate::ocr::BackendKind;
    use crate::routes::app;
    use crate::routes::test_support::{body_json, body_text, data_lines, post_json};
    use crate::testing::{state_with, CountingBackend, Outcome};
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn backend() -> Arc<CountingBackend> {
        Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Ready))
    }

    #[tokio::test]
    async fn test_empty_text_is_400() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});

        let response = app(state)
            .oneshot(post_json("/analyze", json!({"text": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_400() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        state
            .config()
            .save(&json!({"llm": {"api_key": "sk-test", "base_url": "", "model": "gpt-4o"}}))
            .unwrap();

        let response = app(state)
            .oneshot(post_json("/analyze", json!({"text": "The cat sat."})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "missing_credentials");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_ends_with_error_frame() {
        let dir = TempDir::new().unwrap();
        let state = state_with(dir.path(), backend(), |_| {});
        state
            .config()
            .save(&json!({"llm": {
                "api_key": "sk-test",
                "base_url": "http://127.0.0.1:9",
                "model": "gpt-4o"
            }}))
            .unwrap();

        let response = app(state)
            .oneshot(post_json("/analyze", json!({"text": "The cat sat."})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let lines = data_lines(&body);
        assert_eq!(lines.len(), 2);
        let error: Value = serde_json::from_str(&lines[0]).unwrap();
        assert!(error["error"].is_string());
        assert_eq!(lines[1], "[DONE]");
    }
}
