//! Alert fan-out across channel senders
//!
//! Alerts of a batch are handled strictly in order. For each alert every
//! sender is invoked concurrently, each send bounded by its own timeout, and
//! the dispatcher waits for all of them before moving on. Nothing here ever
//! fails the batch: every outcome is recorded in the [`DispatchReport`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::channels::{Channel, ChannelError, ChannelSender};
use crate::validation::{Alert, AlertBatch, AlertStatus};

/// Default bound for a single send
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies an alert within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertKey {
    pub index: usize,
    pub host: String,
    pub alertname: String,
    pub status: AlertStatus,
}

impl AlertKey {
    fn of(index: usize, alert: &Alert) -> Self {
        Self {
            index,
            host: alert.host().to_string(),
            alertname: alert.alertname().to_string(),
            status: alert.status,
        }
    }
}

/// Result of one send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub channel: Channel,
    pub alert: AlertKey,
    pub success: bool,
    pub error_detail: Option<String>,
}

/// Every outcome of one batch, in batch order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Fans alerts out to a fixed set of senders
#[derive(Clone)]
pub struct Dispatcher {
    senders: Arc<[Arc<dyn ChannelSender>]>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(senders: Vec<Arc<dyn ChannelSender>>, send_timeout: Duration) -> Self {
        if senders.is_empty() {
            warn!("no notification channels configured, every dispatch is a no-op");
        } else {
            let channels: Vec<&str> = senders.iter().map(|s| s.channel().as_str()).collect();
            info!("dispatching alerts to {}", channels.join(", "));
        }

        Self {
            senders: senders.into(),
            send_timeout,
        }
    }

    /// Attempt every alert of `batch` on every channel
    #[instrument(skip_all, fields(alerts = batch.alerts.len(), receiver = batch.receiver.as_deref()))]
    pub async fn dispatch(&self, batch: &AlertBatch) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, alert) in batch.alerts.iter().enumerate() {
            let key = AlertKey::of(index, alert);
            let message = alert.render_message();

            let sends = self
                .senders
                .iter()
                .map(|sender| self.send_one(sender.as_ref(), &key, &message));

            report.outcomes.extend(join_all(sends).await);
        }

        for failure in report.failures() {
            warn!(
                "{} delivery failed for alert #{} ({} on {}): {}",
                failure.channel,
                failure.alert.index,
                failure.alert.alertname,
                failure.alert.host,
                failure.error_detail.as_deref().unwrap_or("unknown error")
            );
        }

        info!(
            "dispatched {} alert(s): {} send(s) attempted, {} failed",
            batch.alerts.len(),
            report.attempted(),
            report.failed()
        );

        report
    }

    async fn send_one(
        &self,
        sender: &dyn ChannelSender,
        key: &AlertKey,
        message: &str,
    ) -> DispatchOutcome {
        let result = match tokio::time::timeout(self.send_timeout, sender.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.send_timeout)),
        };

        DispatchOutcome {
            channel: sender.channel(),
            alert: key.clone(),
            success: result.is_ok(),
            error_detail: result.err().map(|e| e.to_string()),
        }
    }
}
