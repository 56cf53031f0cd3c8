//! mTLS metrics ingestion endpoint
//!
//! Agents push one [`MetricsEnvelope`](crate::validation::MetricsEnvelope) per
//! `POST /metrics`. By the time a request reaches [`ingest`] the TLS layer has
//! already verified the client certificate, so the handler only has to:
//!
//! 1. read the body (bounded to 1 MiB)
//! 2. validate the envelope
//! 3. check the envelope's `host` against the certificate identities
//! 4. hand the envelope to the sink without waiting on it

pub mod sink;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use tokio_rustls::TlsAcceptor;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, warn};

use crate::server::{self, Listening, TransportTimeouts};
use crate::tls::{self, ClientIdentity, TlsPaths};
use crate::validation::{self, MAX_METRICS_BODY, ValidationError};

pub use sink::{
    LoggingSink, MetricsSink, RegistrySink, SinkHandle, SinkStats, collector_sinks,
};

/// Collector configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub bind_addr: SocketAddr,

    pub tls: TlsPaths,

    /// Reject envelopes whose `host` is not named by the client certificate
    pub enforce_host_identity: bool,

    pub timeouts: TransportTimeouts,
}

/// Shared state of the ingestion handler
#[derive(Clone)]
pub struct CollectorState {
    pub sink: SinkHandle,
    pub enforce_host_identity: bool,
}

/// Errors returned by `POST /metrics`
#[derive(Debug)]
pub enum IngestError {
    Body(BytesRejection),
    Invalid(ValidationError),
    HostMismatch { host: String },
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::Body(rejection) => server::body_rejection(rejection),
            IngestError::Invalid(e) => (StatusCode::BAD_REQUEST, e.public_reason()).into_response(),
            IngestError::HostMismatch { .. } => (
                StatusCode::FORBIDDEN,
                "Host does not match client certificate",
            )
                .into_response(),
        }
    }
}

/// Build the collector router
pub fn router(state: CollectorState, timeouts: TransportTimeouts) -> Router {
    Router::new()
        .route(
            "/metrics",
            post(ingest).fallback(server::method_not_allowed),
        )
        .fallback(server::post_only_fallback)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_METRICS_BODY))
        .layer(TimeoutLayer::new(timeouts.write))
        .layer(TraceLayer::new_for_http())
}

/// POST /metrics
#[instrument(skip_all)]
pub async fn ingest(
    State(state): State<CollectorState>,
    identity: Option<Extension<ClientIdentity>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<&'static str, IngestError> {
    let body = body.map_err(IngestError::Body)?;

    let envelope = validation::parse_envelope(&body).map_err(|e| {
        debug!("rejected envelope: {e}");
        IngestError::Invalid(e)
    })?;

    if state.enforce_host_identity {
        let bound = identity
            .as_ref()
            .is_some_and(|Extension(identity)| identity.matches(&envelope.host));

        if !bound {
            warn!(
                "envelope for host '{}' does not match client certificate {:?}",
                envelope.host,
                identity.as_ref().map(|Extension(identity)| identity.names())
            );
            return Err(IngestError::HostMismatch {
                host: envelope.host,
            });
        }
    }

    state.sink.accept(envelope);

    Ok("OK")
}

/// Load TLS material, bind and start serving
///
/// TLS material is loaded before the socket is bound, so broken certificates
/// never leave a listener behind.
pub async fn spawn_collector(config: &CollectorConfig, sink: SinkHandle) -> anyhow::Result<Listening> {
    let tls_config = tls::load_server_config(&config.tls).context("failed to load TLS material")?;
    let acceptor = TlsAcceptor::from(Arc::clone(&tls_config));

    if !config.enforce_host_identity {
        warn!("host identity binding disabled: any trusted agent may report for any host");
    }

    let state = CollectorState {
        sink,
        enforce_host_identity: config.enforce_host_identity,
    };
    let app = router(state, config.timeouts);

    let listener = server::bind(config.bind_addr, "collector")
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let listening = server::spawn(listener, app, Some(acceptor), config.timeouts)?;
    info!("accepting metrics on https://{}/metrics", listening.local_addr());

    Ok(listening)
}
