use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn fallback_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        "Invalid endpoint. Valid endpoints: /health, /metrics",
    )
        .into_response()
}
