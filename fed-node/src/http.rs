//! HTTP endpoints for fed-node.
//!
//! - `POST /federation/v1`: framed federation messages, answered by the responder
//! - `GET /health`: liveness and a peer count
//!
//! The listener is plain HTTP; put a TLS-terminating proxy in front of it.

use axum::body::Bytes;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use fed_sync::{FederationResponder, FrameHandler, FEDERATION_PATH, MAX_FRAME_SIZE};
use fed_trust::TrustManager;
use fed_types::InstanceId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the handlers.
pub struct NodeState {
    /// Answers federation frames.
    pub responder: Arc<FederationResponder>,
    /// Peer registry, for health reporting.
    pub trust: Arc<TrustManager>,
    /// This instance.
    pub instance_id: InstanceId,
    /// Process start, for uptime.
    pub started: Instant,
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// This instance's id.
    pub instance_id: String,
    /// Registered peers, revoked included.
    pub peers: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route(&format!("/{FEDERATION_PATH}"), post(federation_handler))
        .route("/health", get(health_handler))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_FRAME_SIZE))
        .layer(Extension(state))
}

async fn federation_handler(
    Extension(state): Extension<Arc<NodeState>>,
    body: Bytes,
) -> impl IntoResponse {
    let reply = state.responder.handle_frame(&body).await;
    ([(header::CONTENT_TYPE, "application/msgpack")], reply)
}

async fn health_handler(Extension(state): Extension<Arc<NodeState>>) -> Json<HealthStatus> {
    let (status, peers) = match state.trust.list_peers().await {
        Ok(peers) => ("ok", peers.len()),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read peers");
            ("degraded", 0)
        }
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.to_string(),
        peers,
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}
