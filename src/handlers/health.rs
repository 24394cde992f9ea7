use crate::core::state::AppState;
use crate::utils::time::current_timestamp;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Downloader instance this process manages
    pub downloader: String,
    pub timestamp: i64,
    /// Unix seconds of the last pass, 0 before the first one
    pub last_pass_at: i64,
}

/// Health check handler
///
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            downloader: state.config.client.name.clone(),
            timestamp: current_timestamp(),
            last_pass_at: state.metrics.last_pass_at.load(Ordering::Relaxed),
        }),
    )
}
