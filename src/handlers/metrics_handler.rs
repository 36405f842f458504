use crate::config::Config;
use crate::server::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};
use std::time::Duration;
use tracing::warn;

/// Prometheus advertises how long it is willing to wait for the scrape.
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Handle the metrics endpoint: scrape every target, merge the result with
/// the default registry and render the text exposition format.
pub async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let budget = scrape_budget(state.exporter.config(), &headers);
    let (mut families, errors) = state.exporter.gather_with_timeout(budget).await;

    // Continue on scrape errors: serve what was collected, log the rest.
    for error in &errors {
        warn!(error = %error, "scrape error");
    }

    families.extend(prometheus::gather());
    families.sort_by(|a, b| a.get_name().cmp(b.get_name()));

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(error) = encoder.encode(&families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {}", error),
        )
            .into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Composes the effective deadline: the configured scrape timeout, tightened
/// by the upstream scraper's advertised timeout minus the configured offset.
fn scrape_budget(config: &Config, headers: &HeaderMap) -> Duration {
    let mut budget = config.global.scrape_timeout;
    let upstream = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(Duration::from_secs_f64);
    if let Some(upstream) = upstream {
        let upstream = upstream.saturating_sub(config.global.scrape_timeout_offset);
        if upstream < budget {
            budget = upstream;
        }
    }
    budget
}
