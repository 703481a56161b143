//! Configuration endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::error::{Result, ServiceError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).post(update_config))
        .route("/config/default", get(default_config))
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.config().load())
}

/// Deep-merge a partial document into the stored configuration
///
/// Settings already applied at startup (ports, model paths, OCR options)
/// take effect after a restart. LLM credentials are read per request.
async fn update_config(
    State(state): State<AppState>,
    Json(partial): Json<Value>,
) -> Result<Json<Value>> {
    if !partial.is_object() {
        return Err(ServiceError::InvalidInput(
            "Config update must be a JSON object".to_string(),
        ));
    }
    let config = state.config().save(&partial)?;
    Ok(Json(json!({ "status": "ok", "config": config })))
}

async fn default_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.config().defaults())
}
