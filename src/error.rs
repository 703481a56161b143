//! Request-level errors and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::UpstreamError;
use crate::ocr::OcrError;
use crate::translate::TranslateError;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Which model is still loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingKind {
    Ocr,
    Translate,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM is not configured: {0}")]
    MissingCredentials(String),

    #[error("Model is still loading")]
    Loading(LoadingKind),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ServiceError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ServiceError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_input", msg.clone())
            }
            ServiceError::MissingCredentials(msg) => {
                (StatusCode::BAD_REQUEST, "missing_credentials", msg.clone())
            }
            ServiceError::Loading(LoadingKind::Ocr) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "loading",
                "OCR model is loading, please retry shortly".to_string(),
            ),
            ServiceError::Loading(LoadingKind::Translate) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "loading",
                "Translation model is loading, please retry shortly".to_string(),
            ),
            ServiceError::Ocr(e) => match e {
                OcrError::InvalidVariant(_) | OcrError::InvalidImage(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_input", e.to_string())
                }
                OcrError::ModelMissing { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "model_missing", e.to_string())
                }
                OcrError::EngineUnavailable(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "engine_unavailable",
                    e.to_string(),
                ),
                OcrError::Recognition(_) | OcrError::Io(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ocr_failed",
                    e.to_string(),
                ),
            },
            ServiceError::Translate(e) => match e {
                TranslateError::Unresolved | TranslateError::NoRemoteMatch(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "translation_unresolved",
                    "No translation model is available".to_string(),
                ),
                TranslateError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "translation_timeout", e.to_string())
                }
                TranslateError::Hub(_) => (
                    StatusCode::BAD_GATEWAY,
                    "download_failed",
                    "Model download failed".to_string(),
                ),
                TranslateError::Model(_) | TranslateError::Worker(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "translation_failed",
                    "Translation failed".to_string(),
                ),
            },
            ServiceError::Upstream(e) => (StatusCode::BAD_GATEWAY, "upstream_error", e.to_string()),
            ServiceError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Failed to save config".to_string(),
            ),
            ServiceError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}
