// Metrics endpoint

use crate::core::error::MonitoringError;
use crate::core::state::AppState;
use crate::utils::auth::verify_api_key;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub api_key: String,
}

/// Returns JSON with the pass counters: passes, decisions, admissions,
/// evictions, partial selections, transport errors and the free space
/// left after the last pass.
///
/// Requires valid API key for authentication.
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsQuery>,
) -> Result<Response, MonitoringError> {
    if !verify_api_key(&params.api_key, &state.config.status.api_key) {
        warn!("Unauthorized metrics access attempt");
        return Err(MonitoringError::InvalidApiKey);
    }

    let snapshot = state.metrics.get_snapshot();

    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::test_config;
    use crate::metrics::collector::{MetricsSnapshot, PassTotals};

    fn create_test_state() -> Arc<AppState> {
        let mut config = test_config();
        config.status.api_key = "test-api-key".to_string();
        Arc::new(AppState::new(config))
    }

    async fn read_snapshot(response: Response) -> MetricsSnapshot {
        use axum::body::Body;
        use http_body_util::BodyExt;

        let (_, body) = response.into_parts();
        let body = Body::new(body);
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_handler_success() {
        let state = create_test_state();

        let params = MetricsQuery {
            api_key: "test-api-key".to_string(),
        };

        let response = metrics_handler(State(state), Query(params)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = read_snapshot(response).await;
        assert_eq!(snapshot.passes, 0);
        assert_eq!(snapshot.evictions, 0);
        assert!(snapshot.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_metrics_handler_invalid_api_key() {
        let state = create_test_state();

        let params = MetricsQuery {
            api_key: "wrong-key".to_string(),
        };

        let result = metrics_handler(State(state), Query(params)).await;
        assert!(result.is_err());
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_metrics_handler_closed_without_key() {
        let state = Arc::new(AppState::new(test_config()));

        let params = MetricsQuery {
            api_key: String::new(),
        };

        assert!(metrics_handler(State(state), Query(params)).await.is_err());
    }

    #[tokio::test]
    async fn test_metrics_handler_with_data() {
        let state = create_test_state();

        state.metrics.record_pass(
            PassTotals {
                decisions: 3,
                admissions: 1,
                evictions: 2,
                ..Default::default()
            },
            1_700_000_000,
        );

        let params = MetricsQuery {
            api_key: "test-api-key".to_string(),
        };

        let response = metrics_handler(State(state), Query(params)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = read_snapshot(response).await;
        assert_eq!(snapshot.passes, 1);
        assert_eq!(snapshot.decisions, 3);
        assert_eq!(snapshot.evictions, 2);
    }
}
