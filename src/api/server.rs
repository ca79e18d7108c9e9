//! HTTP server wiring

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::live::live_handler;
use super::upload::upload_handler;
use super::AppState;
use crate::config::ServerConfig;
use crate::shared::ServiceStats;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    detector: &'static str,
    stats: ServiceStats,
}

/// Build the application router
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = config.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route("/health", get(health_handler))
        .route("/upload/", post(upload_handler))
        .route("/live/", get(live_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM
pub async fn run_server(state: AppState, bind: &str) -> Result<()> {
    let config = state.shared.read().config.server.clone();
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address {:?}", bind))?;

    let shutdown = state.shutdown.clone();
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  POST /upload/ - Image or video upload");
    info!("  GET  /live/   - Live frames (WebSocket)");
    info!("  GET  /health  - Service counters");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.shared.read().stats.clone();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        detector: state.pipeline.detector_name(),
        stats,
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
