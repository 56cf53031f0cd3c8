//! Health check endpoint

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::api::ApiState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /healthz
///
/// Unauthenticated liveness probe
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    state.metrics.observe_request("/healthz");

    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
