//! Bearer-gated query gateway
//!
//! Read-only HTTP front door over the host registry.
//!
//! ## Endpoints
//!
//! - `GET /healthz` - Liveness probe (no auth)
//! - `GET /api/v1/hosts` - Known hosts with their last report time
//! - `GET /metrics/prometheus` - Gateway metrics in the Prometheus text format
//!
//! Everything except `/healthz` requires `Authorization: Bearer <token>`;
//! the token itself is judged by a pluggable [`TokenVerifier`].

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod verifier;

pub use error::{ApiError, ApiResult};
pub use metrics::GatewayMetrics;
pub use state::ApiState;
pub use verifier::{PresenceOnly, StaticToken, TokenVerifier};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::get};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::server::{self, Listening, TransportTimeouts};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Only accept this token; any well-formed token is accepted if unset
    pub auth_token: Option<String>,

    pub timeouts: TransportTimeouts,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            auth_token: None,
            timeouts: TransportTimeouts::http(),
        }
    }
}

impl ApiConfig {
    /// Verifier matching the configured token
    pub fn verifier(&self) -> Arc<dyn TokenVerifier> {
        match self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Arc::new(StaticToken::new(token)),
            None => Arc::new(PresenceOnly),
        }
    }
}

/// Build the gateway router
pub fn router(state: ApiState, verifier: Arc<dyn TokenVerifier>, timeouts: TransportTimeouts) -> Router {
    let protected = Router::new()
        .route("/api/v1/hosts", get(routes::hosts::list_hosts))
        .route("/metrics/prometheus", get(routes::prometheus::scrape))
        .route_layer(axum::middleware::from_fn_with_state(
            verifier,
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(routes::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(TimeoutLayer::new(timeouts.write))
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// Binds `config.bind_addr` and serves in a background task.
pub async fn spawn_api_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<Listening> {
    if config.auth_token.is_none() {
        info!("no API token configured, accepting any bearer token");
    }

    let app = router(state, config.verifier(), config.timeouts);

    let listener = server::bind(config.bind_addr, "gateway")
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    Ok(server::spawn(listener, app, None, config.timeouts)?)
}
