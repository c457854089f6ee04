//! Read-only JSON status API.
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::alerting::MonitoringStatus;
use crate::detection::{DetectionManager, DetectionStatus};
use crate::error::AppError;
use crate::metrics::CurrentMetrics;
use crate::monitor::MonitoringService;
use crate::version::VERSION;

pub mod error;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub monitoring: Arc<MonitoringService>,
    /// Absent when the camera add-on is not enabled for this deployment.
    pub detection: Option<Arc<DetectionManager>>,
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

async fn monitoring_status_handler(State(state): State<Arc<AppState>>) -> Json<MonitoringStatus> {
    Json(state.monitoring.status())
}

async fn detection_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DetectionStatus>, ApiError> {
    let manager = state
        .detection
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("AI detection is not enabled".to_string()))?;
    Ok(Json(manager.status()))
}

async fn current_metrics_handler(State(state): State<Arc<AppState>>) -> Json<CurrentMetrics> {
    Json(state.monitoring.current_metrics().await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/monitoring/status", get(monitoring_status_handler))
        .route("/api/detection/status", get(detection_status_handler))
        .route("/api/metrics/current", get(current_metrics_handler))
        .with_state(state)
}

/// Serves the API on `listen` until `shutdown` resolves.
pub async fn serve(
    listen: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| AppError::InvalidListenAddress(listen.to_string()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Status API listening.");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Status API stopped.");
    Ok(())
}
