//! Alert webhook receiver
//!
//! `POST /alert` accepts an Alertmanager-style batch, fans every alert out to
//! the configured channels and answers `200 "Received"` once all sends have
//! been attempted. Delivery failures are logged, never returned.
//!
//! Only the body read is bounded by the listener's read timeout. A batch is
//! always dispatched to the end, each send bounded by its own timeout, even
//! when that takes longer than the write timeout or the caller hangs up.

pub mod channels;
pub mod dispatcher;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use reqwest::Client;
use tower_http::{
    limit::RequestBodyLimitLayer, timeout::RequestBodyTimeoutLayer, trace::TraceLayer,
};
use tracing::{debug, error, info, instrument};

use crate::server::{self, Listening, TransportTimeouts};
use crate::validation::{self, MAX_ALERT_BODY, ValidationError};

pub use channels::{
    Channel, ChannelConfig, ChannelError, ChannelSender, DeliveryMode, LoggingSender,
    PAGERDUTY_EVENTS_URL, PagerDutySender, SlackSender, build_senders,
};
pub use dispatcher::{AlertKey, DEFAULT_SEND_TIMEOUT, DispatchOutcome, DispatchReport, Dispatcher};

/// Notifier configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub bind_addr: SocketAddr,
    pub channels: ChannelConfig,
    pub delivery: DeliveryMode,
    pub pagerduty_url: String,
    pub send_timeout: Duration,
    pub timeouts: TransportTimeouts,
}

/// Errors returned by `POST /alert`
#[derive(Debug)]
pub enum AlertError {
    Body(BytesRejection),
    Invalid(ValidationError),
}

impl IntoResponse for AlertError {
    fn into_response(self) -> Response {
        match self {
            AlertError::Body(rejection) => server::body_rejection(rejection),
            AlertError::Invalid(e) => (StatusCode::BAD_REQUEST, e.public_reason()).into_response(),
        }
    }
}

/// Build the notifier router around `dispatcher`
pub fn router(dispatcher: Dispatcher, timeouts: TransportTimeouts) -> Router {
    Router::new()
        .route("/alert", post(receive).fallback(server::method_not_allowed))
        .fallback(server::not_found)
        .with_state(dispatcher)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_ALERT_BODY))
        .layer(RequestBodyTimeoutLayer::new(timeouts.read))
        .layer(TraceLayer::new_for_http())
}

/// POST /alert
#[instrument(skip_all)]
pub async fn receive(
    State(dispatcher): State<Dispatcher>,
    body: Result<Bytes, BytesRejection>,
) -> Result<&'static str, AlertError> {
    let body = body.map_err(AlertError::Body)?;

    let batch = validation::parse_alert_batch(&body).map_err(|e| {
        debug!("rejected alert batch: {e}");
        AlertError::Invalid(e)
    })?;

    debug!(
        "received batch group_key={:?} status={:?} with {} alert(s)",
        batch.group_key,
        batch.status,
        batch.alerts.len()
    );

    // detached so a dropped connection cannot cut the batch short
    let dispatch = tokio::spawn(async move { dispatcher.dispatch(&batch).await });
    if let Err(e) = dispatch.await {
        error!("alert dispatch task failed: {e}");
    }

    Ok("Received")
}

/// Build the senders, bind and start serving
pub async fn spawn_notifier(config: &NotifierConfig) -> anyhow::Result<Listening> {
    let client = Client::builder()
        .timeout(config.send_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let senders = build_senders(&config.channels, config.delivery, &client, &config.pagerduty_url);
    let dispatcher = Dispatcher::new(senders, config.send_timeout);
    let app = router(dispatcher, config.timeouts);

    let listener = server::bind(config.bind_addr, "notifier")
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let listening = server::spawn(listener, app, None, config.timeouts)?;
    info!(
        "accepting alerts on http://{}/alert ({:?} delivery)",
        listening.local_addr(),
        config.delivery
    );

    Ok(listening)
}
