//! API shared state

use std::sync::Arc;

use crate::api::metrics::GatewayMetrics;
use crate::registry::HostRegistry;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Source of `/api/v1/hosts`
    pub registry: Arc<dyn HostRegistry>,

    /// Gateway's own Prometheus metrics
    pub metrics: Arc<GatewayMetrics>,
}

impl ApiState {
    pub fn new(registry: Arc<dyn HostRegistry>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { registry, metrics }
    }
}
