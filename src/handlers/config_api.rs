use crate::server::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Handle the config endpoint: echo the effective configuration as YAML,
/// with DSN credentials masked.
pub async fn config(State(state): State<AppState>) -> Response {
    match serde_yaml::to_string(&state.exporter.config().masked()) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to serialize configuration: {}", error),
        )
            .into_response(),
    }
}
