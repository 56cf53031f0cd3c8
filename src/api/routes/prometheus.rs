//! Prometheus scrape endpoint

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};

use crate::api::{ApiResult, ApiState};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// GET /metrics/prometheus
pub async fn scrape(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    state.metrics.observe_request("/metrics/prometheus");

    let hosts_known = state.registry.hosts().await?.len();
    let body = state.metrics.render(hosts_known)?;

    Ok(([(CONTENT_TYPE, TEXT_FORMAT)], body))
}
