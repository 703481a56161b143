//! Log buffer endpoints

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::logging::{LogBuffer, LogEntry};
use crate::sse;
use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since_id: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub since_id: u64,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub last_id: u64,
}

fn default_limit() -> usize {
    100
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/logs", get(list_logs))
        .route("/logs/stream", get(stream_logs))
        .route("/logs/clear", post(clear_logs))
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    let buffer = state.logs();
    let mut logs = buffer.get_all(query.since_id);
    if query.limit > 0 && logs.len() > query.limit {
        logs.drain(..logs.len() - query.limit);
    }
    Json(LogsResponse {
        logs,
        last_id: buffer.last_id(),
    })
}

/// Poll the buffer and emit each new entry as one frame
///
/// After a clear streaming restarts from the first entry.
fn poll_entries(buffer: Arc<LogBuffer>, since_id: u64) -> impl Stream<Item = LogEntry> {
    let ticker = tokio::time::interval(POLL_INTERVAL);
    let cursor = buffer.cursor(since_id);
    stream::unfold(
        (buffer, cursor, ticker),
        |(buffer, mut cursor, mut ticker)| async move {
            loop {
                ticker.tick().await;
                let (entries, next) = buffer.read_from(cursor);
                cursor = next;
                if !entries.is_empty() {
                    return Some((entries, (buffer, cursor, ticker)));
                }
            }
        },
    )
    .flat_map(stream::iter)
}

async fn stream_logs(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let entries = poll_entries(state.logs().clone(), query.since_id);
    Sse::new(entries.map(|entry| Ok(sse::log_event(&entry)))).keep_alive(KeepAlive::default())
}

async fn clear_logs(State(state): State<AppState>) -> Json<Value> {
    state.logs().clear();
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::BackendKind;
    use crate::routes::app;
    use crate::routes::test_support::{body_json, get, post_json};
    use crate::testing::{state_with, CountingBackend, Outcome};
    use axum::http::StatusCode;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(dir: &TempDir) -> AppState {
        let backend = Arc::new(CountingBackend::new(BackendKind::Tesseract, Outcome::Ready));
        state_with(dir.path(), backend, |_| {})
    }

    #[tokio::test]
    async fn test_list_applies_since_and_limit() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        for i in 0..10 {
            state.logs().push("INFO", format!("line {}", i));
        }

        let body = body_json(
            app(state.clone())
                .oneshot(get("/logs?since_id=4&limit=3"))
                .await
                .unwrap(),
        )
        .await;
        let ids: Vec<u64> = body["logs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![8, 9, 10]);
        assert_eq!(body["last_id"], 10);

        let all = body_json(app(state).oneshot(get("/logs?limit=0")).await.unwrap()).await;
        assert_eq!(all["logs"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_clear_resets_buffer() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        state.logs().push("WARN", "before");

        let response = app(state.clone())
            .oneshot(post_json("/logs/clear", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));

        let body = body_json(app(state).oneshot(get("/logs")).await.unwrap()).await;
        assert_eq!(body["logs"], json!([]));
        assert_eq!(body["last_id"], 0);
    }

    #[tokio::test]
    async fn test_poll_restarts_after_clear() {
        let buffer = Arc::new(LogBuffer::new(50));
        for i in 0..3 {
            buffer.push("INFO", format!("old {}", i));
        }

        let mut entries = Box::pin(poll_entries(buffer.clone(), 2));
        let first = entries.next().await.unwrap();
        assert_eq!(first.id, 3);

        buffer.clear();
        for i in 0..6 {
            buffer.push("INFO", format!("fresh {}", i));
        }
        let mut ids = Vec::new();
        for _ in 0..6 {
            let next = tokio::time::timeout(Duration::from_secs(3), entries.next())
                .await
                .unwrap()
                .unwrap();
            ids.push(next.id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_stream_emits_log_frames() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        state.logs().push("INFO", "hello overlay");

        let response = app(state).oneshot(get("/logs/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(3), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("hello overlay"));
    }
}
