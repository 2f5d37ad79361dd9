//! Admin HTTP surface: health and Prometheus metrics
//!
//! ```text
//! GET /health   -> { status, version, uptime_secs, active_connections, registered }
//! GET /metrics  -> Prometheus text format
//! ```

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::metrics;
use crate::state::SharedState;

use super::ServerError;

/// State shared with admin handlers
#[derive(Debug, Clone)]
pub struct AdminState {
    pub shared: SharedState,
    pub start_time: Instant,
}

impl AdminState {
    pub fn new(shared: SharedState) -> Self {
        Self {
            shared,
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_connections: usize,
    pub registered: bool,
}

/// Create the admin router
pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_connections: state.shared.connections.active(),
        registered: state.shared.registration.is_registered(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}

/// Serve the admin router until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("admin {addr}: {e}")))?;

    tracing::info!(addr = %addr, "Admin server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    tracing::info!("Admin server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reflects_shared_state() {
        let shared = SharedState::new();
        let _guard = shared.connections.acquire();
        let state = AdminState::new(shared.clone());

        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_connections, 1);
        assert!(!health.registered);

        shared.registration.lock().await.set_registered(true);
        let Json(health) = health_check(State(AdminState::new(shared))).await;
        assert!(health.registered);
    }

    #[tokio::test]
    async fn test_serve_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(AdminState::new(SharedState::new()));
        let server = tokio::spawn(async move { axum::serve(listener, router).await });

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_connections"], 0);

        let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(response.status(), 200);

        server.abort();
    }
}
