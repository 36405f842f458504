use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Handle the health endpoint.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
