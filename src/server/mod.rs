// volumetool/src/server/mod.rs
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tracing::{error, info};

use crate::volume::Volume;

/// The trigger surface: a POST to any path starts a backup pass. The path
/// and body carry no meaning, which keeps callers as simple as
/// `curl -X POST host:8000`.
pub fn create_router(volume: Arc<Volume>) -> Router {
    Router::new()
        .route("/", post(trigger_backup))
        .route("/{*path}", post(trigger_backup))
        .with_state(volume)
}

async fn trigger_backup(State(volume): State<Arc<Volume>>) -> impl IntoResponse {
    info!("Backup started");
    match volume.backup().await {
        Ok(()) => (StatusCode::OK, "backup complete\n".to_string()),
        Err(error) => {
            error!("Triggered backup failed: {:#}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("backup failed: {error:#}\n"),
            )
        }
    }
}

/// Resolves once the process receives SIGINT or SIGTERM, letting the
/// server drain in-flight requests before the final backup pass.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}
