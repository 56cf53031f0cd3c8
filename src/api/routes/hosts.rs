//! Host listing endpoint

use axum::{Json, extract::State};
use tracing::instrument;

use crate::api::{ApiResult, ApiState};
use crate::registry::HostRecord;

/// GET /api/v1/hosts
///
/// All known hosts with their last report time, sorted by host name.
#[instrument(skip_all)]
pub async fn list_hosts(State(state): State<ApiState>) -> ApiResult<Json<Vec<HostRecord>>> {
    state.metrics.observe_request("/api/v1/hosts");

    let hosts = state.registry.hosts().await?;
    Ok(Json(hosts))
}
