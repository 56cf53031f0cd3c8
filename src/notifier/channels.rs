//! Notification channels and their senders
//!
//! Each configured channel gets exactly one [`ChannelSender`]. In `log`
//! delivery mode every channel is backed by a [`LoggingSender`]; in `live`
//! mode Slack and PagerDuty talk HTTP. Email never has a wire implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::config::non_empty;

/// Default PagerDuty Events API v2 endpoint
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// A notification destination kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Slack,
    PagerDuty,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Slack => "slack",
            Channel::PagerDuty => "pagerduty",
            Channel::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How configured channels deliver messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DeliveryMode {
    /// Log every message instead of sending it
    #[default]
    Log,

    /// Send Slack and PagerDuty messages over HTTP
    Live,
}

/// Destinations for every channel, fixed at startup
///
/// Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    pub slack_webhook: Option<String>,
    pub pagerduty_token: Option<String>,
    pub smtp_host: Option<String>,
}

impl ChannelConfig {
    pub fn new(
        slack_webhook: Option<String>,
        pagerduty_token: Option<String>,
        smtp_host: Option<String>,
    ) -> Self {
        Self {
            slack_webhook: non_empty(slack_webhook),
            pagerduty_token: non_empty(pagerduty_token),
            smtp_host: non_empty(smtp_host),
        }
    }

    /// Channels that have a destination, in a fixed order
    pub fn configured(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(3);
        if self.slack_webhook.is_some() {
            channels.push(Channel::Slack);
        }
        if self.pagerduty_token.is_some() {
            channels.push(Channel::PagerDuty);
        }
        if self.smtp_host.is_some() {
            channels.push(Channel::Email);
        }
        channels
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Delivers a rendered message to one channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &str) -> Result<(), ChannelError>;
}

/// Writes the message to the log and always succeeds
#[derive(Debug, Clone)]
pub struct LoggingSender {
    channel: Channel,
}

impl LoggingSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LoggingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        info!(
            "{}",
            json!({ "channel": self.channel.as_str(), "message": message })
        );
        Ok(())
    }
}

/// Posts `{"text": message}` to a Slack incoming webhook
#[derive(Debug, Clone)]
pub struct SlackSender {
    client: Client,
    webhook_url: String,
}

impl SlackSender {
    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl ChannelSender for SlackSender {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    #[instrument(skip_all)]
    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await?;

        check_status(response).await
    }
}

#[derive(Debug, Serialize)]
struct PagerDutyEvent<'a> {
    routing_key: &'a str,
    event_action: &'static str,
    payload: PagerDutyPayload<'a>,
}

#[derive(Debug, Serialize)]
struct PagerDutyPayload<'a> {
    summary: &'a str,
    source: &'static str,
    severity: &'static str,
}

/// Triggers a PagerDuty Events API v2 event
#[derive(Debug, Clone)]
pub struct PagerDutySender {
    client: Client,
    events_url: String,
    routing_key: String,
}

impl PagerDutySender {
    pub fn new(client: Client, events_url: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            client,
            events_url: events_url.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl ChannelSender for PagerDutySender {
    fn channel(&self) -> Channel {
        Channel::PagerDuty
    }

    #[instrument(skip_all)]
    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let event = PagerDutyEvent {
            routing_key: &self.routing_key,
            event_action: "trigger",
            payload: PagerDutyPayload {
                summary: message,
                source: "process-dashboard",
                severity: "critical",
            },
        };

        let response = self.client.post(&self.events_url).json(&event).send().await?;

        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Status { status, body })
}

/// Build one sender per configured channel
pub fn build_senders(
    config: &ChannelConfig,
    mode: DeliveryMode,
    client: &Client,
    pagerduty_url: &str,
) -> Vec<Arc<dyn ChannelSender>> {
    config
        .configured()
        .into_iter()
        .map(|channel| -> Arc<dyn ChannelSender> {
            match (mode, channel) {
                (DeliveryMode::Live, Channel::Slack) => Arc::new(SlackSender::new(
                    client.clone(),
                    config.slack_webhook.clone().unwrap_or_default(),
                )),
                (DeliveryMode::Live, Channel::PagerDuty) => Arc::new(PagerDutySender::new(
                    client.clone(),
                    pagerduty_url,
                    config.pagerduty_token.clone().unwrap_or_default(),
                )),
                (_, channel) => Arc::new(LoggingSender::new(channel)),
            }
        })
        .collect()
}
