//! HTTP routes for the RSTA service

pub mod analyze;
pub mod config;
pub mod health;
pub mod logs;
pub mod models;
pub mod ocr;
pub mod translate;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    // The overlay is served from a file:// origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(models::router())
        .merge(ocr::router())
        .merge(translate::router())
        .merge(analyze::router())
        .merge(logs::router())
        .merge(config::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
