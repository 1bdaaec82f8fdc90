//! HTTP health, readiness, and version endpoints.
//!
//! ## Routes
//!
//! - `GET /health` - Liveness check, always `200 {"status":"ok"}`
//! - `GET /readiness` - Pings storage; `200` when reachable, `503` otherwise
//! - `GET /version` - Package version and build identifier

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use natlog_pipeline::StorageConnection;

/// Build identifier baked in at compile time (`NATLOG_BUILD`), if any.
pub const BUILD: &str = match option_env!("NATLOG_BUILD") {
    Some(build) => build,
    None => "unknown",
};

/// Shared state for API handlers.
pub struct ApiState<S> {
    storage: Arc<S>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

/// Probe response body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "ok",
            reason: None,
            error: None,
        }
    }
}

/// Version response body.
#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    version: &'static str,
    build: &'static str,
    status: &'static str,
}

/// Build the API router over a storage connection.
pub fn router<S: StorageConnection>(storage: Arc<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readiness", get(readiness::<S>))
        .route("/version", get(version))
        .with_state(ApiState { storage })
}

/// Bind the API listener.
///
/// Called before the pipeline starts so bind errors abort startup.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind API listener on {}: {}", addr, e))
}

/// Serve the router until `cancel` fires.
pub fn spawn_server(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let addr = listener.local_addr()?;
    tracing::info!(bind = %addr, "HTTP API listening");

    let task = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "HTTP API server failed");
        }
        tracing::debug!("HTTP API server stopped");
    });

    Ok((addr, task))
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

async fn readiness<S: StorageConnection>(
    State(state): State<ApiState<S>>,
) -> (StatusCode, Json<StatusResponse>) {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, Json(StatusResponse::ok())),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse {
                    status: "fail",
                    reason: Some("storage ping failed"),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        build: BUILD,
        status: "ok",
    })
}
