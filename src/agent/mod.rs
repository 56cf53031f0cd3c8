//! Push agent
//!
//! Runs on every monitored host, snapshots the local system and pushes the
//! result to the collector over mTLS.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Snapshot → MetricsEnvelope → POST https://collector/metrics
//!     ↑
//!     └─── Commands (PushNow, Shutdown)
//! ```
//!
//! A failed push is logged and retried on the next tick; the agent never
//! stops because the collector is unreachable.

pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Certificate, Client, Identity};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::validation::MetricsEnvelope;

pub use snapshot::{HostMetrics, SnapshotSource, SystemSnapshot};

/// Agent configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Full ingestion URL, e.g. `https://collector:8443/metrics`
    pub collector_url: String,

    /// Client certificate chain presented to the collector
    pub cert: PathBuf,

    /// Private key for `cert`
    pub key: PathBuf,

    /// CA bundle the collector's certificate must chain to
    pub ca_bundle: PathBuf,

    /// Host name reported in every envelope
    pub host: String,

    pub interval: Duration,
}

/// Host name of this machine, if the OS reports one
pub fn local_host_name() -> Option<String> {
    sysinfo::System::host_name().filter(|name| !name.trim().is_empty())
}

/// Build an HTTP client that authenticates with the agent's certificate
pub fn build_client(config: &AgentConfig) -> Result<Client> {
    let mut pem = std::fs::read(&config.cert)
        .with_context(|| format!("failed to read client certificate {}", config.cert.display()))?;
    let key = std::fs::read(&config.key)
        .with_context(|| format!("failed to read client key {}", config.key.display()))?;
    pem.push(b'\n');
    pem.extend_from_slice(&key);

    let identity = Identity::from_pem(&pem).context("invalid client certificate or key")?;

    let ca = std::fs::read(&config.ca_bundle)
        .with_context(|| format!("failed to read CA bundle {}", config.ca_bundle.display()))?;
    let roots = Certificate::from_pem_bundle(&ca).context("invalid CA bundle")?;
    if roots.is_empty() {
        anyhow::bail!("no certificates found in {}", config.ca_bundle.display());
    }

    let mut builder = Client::builder()
        .use_rustls_tls()
        .identity(identity)
        .timeout(Duration::from_secs(10));
    for root in roots {
        builder = builder.add_root_certificate(root);
    }

    builder.build().context("failed to build HTTP client")
}

/// Commands accepted by a running agent
#[derive(Debug)]
pub enum AgentCommand {
    /// Push immediately and report the result
    PushNow {
        respond_to: oneshot::Sender<Result<()>>,
    },

    Shutdown,
}

/// Actor pushing snapshots at a fixed interval
pub struct AgentActor {
    config: AgentConfig,

    /// Reused across pushes
    client: Client,

    source: Arc<dyn SnapshotSource>,

    command_rx: mpsc::Receiver<AgentCommand>,
}

impl AgentActor {
    pub fn new(
        config: AgentConfig,
        client: Client,
        source: Arc<dyn SnapshotSource>,
        command_rx: mpsc::Receiver<AgentCommand>,
    ) -> Self {
        Self {
            config,
            client,
            source,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(host = %self.config.host))]
    pub async fn run(mut self) {
        debug!(
            "pushing to {} every {:?}",
            self.config.collector_url, self.config.interval
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.push().await {
                        error!("failed to push metrics: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AgentCommand::PushNow { respond_to } => {
                            debug!("received PushNow command");
                            let _ = respond_to.send(self.push().await);
                        }

                        AgentCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("agent stopped");
    }

    /// Snapshot and push once
    async fn push(&self) -> Result<()> {
        let metrics = self.source.snapshot().await?;

        let envelope = MetricsEnvelope {
            timestamp: Utc::now().fixed_offset(),
            host: self.config.host.clone(),
            metrics,
        };

        let response = self
            .client
            .post(&self.config.collector_url)
            .json(&envelope)
            .send()
            .await
            .context("failed to send HTTP request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("collector answered {status}: {}", body.trim());
        }

        trace!("pushed metrics");
        Ok(())
    }
}

/// Handle to a running [`AgentActor`]
#[derive(Clone)]
pub struct AgentHandle {
    sender: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    pub fn spawn(config: AgentConfig, client: Client, source: Arc<dyn SnapshotSource>) -> Self {
        let (sender, command_rx) = mpsc::channel(8);
        tokio::spawn(AgentActor::new(config, client, source, command_rx).run());
        Self { sender }
    }

    /// Push right away instead of waiting for the next tick
    pub async fn push_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::PushNow { respond_to: tx })
            .await
            .context("failed to send PushNow command")?;
        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AgentCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
