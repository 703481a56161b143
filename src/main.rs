//! RSTA Server
//!
//! Local OCR and translation service for the screen translation overlay.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rsta_server::config::ConfigStore;
use rsta_server::logging::{LogBuffer, LogBufferLayer};
use rsta_server::state::AppState;
use rsta_server::{preload, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Every event also lands in the ring buffer served by /logs
    let logs = Arc::new(LogBuffer::from_env());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rsta_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(LogBufferLayer::new(logs.clone()))
        .init();

    let config = ConfigStore::from_env();
    tracing::info!("Starting RSTA Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config file: {}", config.path().display());

    let state = AppState::new(config, logs);
    let settings = state.settings().clone();
    tracing::info!("OCR backends: {:?}", settings.ocr.backends);
    tracing::info!(
        "Translation model: {} ({}) in {}",
        settings.translate.repo_id,
        settings.translate.quant,
        settings.translate.model_dir.display()
    );

    preload::log_model_summary(&state);
    // Not awaited; requests are served while models load
    let _preload = preload::spawn(&state);

    let app = routes::app(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("RSTA Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
