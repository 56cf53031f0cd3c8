//! Payload validation for the ingestion and alerting endpoints
//!
//! Both endpoints receive untrusted JSON. Everything in here runs before any
//! business logic: a body either parses into one of the types below and
//! satisfies their invariants, or it is rejected with a [`ValidationError`].
//!
//! ## Limits
//!
//! - Metrics envelopes: 1 MiB ([`MAX_METRICS_BODY`])
//! - Alert batches: 512 KiB ([`MAX_ALERT_BODY`])
//!
//! The limits are enforced by the HTTP layer while the body streams in; the
//! parsers here only ever see bodies that already fit.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted size of a metrics envelope body
pub const MAX_METRICS_BODY: usize = 1 << 20;

/// Maximum accepted size of an alert batch body
pub const MAX_ALERT_BODY: usize = 512 << 10;

/// Errors produced while validating an inbound payload
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Body is not valid JSON or does not have the expected shape
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope `host` is empty or whitespace
    #[error("host must not be empty")]
    EmptyHost,

    /// Envelope `metrics` is `null`
    #[error("metrics must not be null")]
    MissingMetrics,
}

impl ValidationError {
    /// Short reason that is safe to echo back to the caller
    pub fn public_reason(&self) -> &'static str {
        match self {
            ValidationError::Json(_) => "Invalid JSON",
            ValidationError::EmptyHost => "Invalid payload: host must not be empty",
            ValidationError::MissingMetrics => "Invalid payload: metrics must not be null",
        }
    }
}

// ============================================================================
// Metrics envelope
// ============================================================================

/// A metrics payload pushed by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    /// Capture time as reported by the agent (RFC3339)
    pub timestamp: DateTime<FixedOffset>,

    /// Name of the reporting host
    pub host: String,

    /// Opaque metric blob; any well-formed JSON except `null`
    pub metrics: serde_json::Value,
}

/// Parse and validate a metrics envelope
pub fn parse_envelope(body: &[u8]) -> Result<MetricsEnvelope, ValidationError> {
    let envelope: MetricsEnvelope = serde_json::from_slice(body)?;

    if envelope.host.trim().is_empty() {
        return Err(ValidationError::EmptyHost);
    }

    if envelope.metrics.is_null() {
        return Err(ValidationError::MissingMetrics);
    }

    Ok(envelope)
}

// ============================================================================
// Alerts
// ============================================================================

/// State of an alert as reported by the alert evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single alert inside a webhook batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub status: AlertStatus,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,

    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
}

impl Alert {
    /// Routing label `host`, empty if absent
    pub fn host(&self) -> &str {
        self.label("host")
    }

    /// Routing label `alertname`, empty if absent
    pub fn alertname(&self) -> &str {
        self.label("alertname")
    }

    fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Human readable notification text
    pub fn render_message(&self) -> String {
        format!(
            "Host '{}' alert '{}' is {}",
            self.host(),
            self.alertname(),
            self.status
        )
    }
}

/// Webhook payload carrying zero or more alerts
///
/// Only `alerts` drives dispatch. The envelope fields are kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBatch {
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub group_key: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub receiver: Option<String>,

    #[serde(default, rename = "externalURL")]
    pub external_url: Option<String>,

    #[serde(default)]
    pub alerts: Vec<Alert>,
}

/// Parse and validate an alert batch
pub fn parse_alert_batch(body: &[u8]) -> Result<AlertBatch, ValidationError> {
    Ok(serde_json::from_slice(body)?)
}
