//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared state for health check endpoints.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Set once the cache is synced and workers are running.
    ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the operator as ready to reconcile.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("Health check: operator marked as ready");
    }

    /// Mark the operator as no longer accepting work (shutdown in progress).
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Kubelet probes target the pod IP, so every interface is bound
fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Run the health check HTTP server.
///
/// Runs until the server encounters a fatal error. Spawn it as a separate task
/// alongside the controller.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr(port)).await?;

    info!(port = port, "Health check server listening");

    axum::serve(listener, router(state)).await
}

/// Liveness probe endpoint.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe endpoint.
///
/// Returns 503 Service Unavailable until the initial cache sync completed and
/// again once shutdown has started.
async fn readyz(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        debug!("Readiness probe: OK");
        StatusCode::OK
    } else {
        debug!("Readiness probe: NOT READY");
        StatusCode::SERVICE_UNAVAILABLE
    }
}
