// Status server routes

use crate::core::state::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::handlers::health::health_handler))
        // Requires the status API key
        .route("/metrics", get(crate::handlers::metrics::metrics_handler))
        .fallback(crate::handlers::fallback::fallback_handler)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::test_config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let mut config = test_config();
        config.status.api_key = "status-key".to_string();
        build_router(Arc::new(AppState::new(config)))
    }

    #[tokio::test]
    async fn test_routes() {
        let cases = [
            ("/health", StatusCode::OK),
            ("/metrics?api_key=status-key", StatusCode::OK),
            ("/metrics?api_key=nope", StatusCode::UNAUTHORIZED),
            ("/torrents", StatusCode::NOT_FOUND),
        ];

        for (uri, expected) in cases {
            let response = router()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{}", uri);
        }
    }
}
