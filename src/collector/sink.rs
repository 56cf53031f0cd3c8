//! Sinks for accepted metrics envelopes
//!
//! The ingestion endpoint must never wait on what happens after validation,
//! so envelopes are handed to a [`SinkHandle`] which queues them for a
//! background actor. The actor fans each envelope out to its inner sinks.
//!
//! ## Message Flow
//!
//! ```text
//! POST /metrics → SinkHandle::accept (try_send) → SinkActor → [LoggingSink, RegistrySink, ...]
//!                        │
//!                        └─── queue full: envelope dropped, counted, warned
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::registry::HostRegistry;
use crate::validation::MetricsEnvelope;

/// Something that consumes accepted envelopes
///
/// Sinks run on the sink actor, never on the request path. A failing sink
/// only affects its own envelope.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn accept(&self, envelope: &MetricsEnvelope) -> Result<()>;
}

/// Logs every envelope, including the raw metrics blob
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl MetricsSink for LoggingSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn accept(&self, envelope: &MetricsEnvelope) -> Result<()> {
        info!(
            "received metrics from host={} at timestamp={}, raw metrics={}",
            envelope.host,
            envelope.timestamp.to_rfc3339(),
            envelope.metrics
        );
        Ok(())
    }
}

/// Records the reporting host as seen in a [`HostRegistry`]
pub struct RegistrySink {
    registry: Arc<dyn HostRegistry>,
}

impl RegistrySink {
    pub fn new(registry: Arc<dyn HostRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MetricsSink for RegistrySink {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn accept(&self, envelope: &MetricsEnvelope) -> Result<()> {
        self.registry
            .record(&envelope.host, Utc::now())
            .await
            .context("failed to record host")
    }
}

/// Sinks installed by the collector
///
/// Envelopes are always logged. With a `registry` every reporting host is
/// also recorded there, which is how an in-process gateway sees live hosts.
pub fn collector_sinks(registry: Option<Arc<dyn HostRegistry>>) -> Vec<Arc<dyn MetricsSink>> {
    let mut sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(LoggingSink)];
    if let Some(registry) = registry {
        sinks.push(Arc::new(RegistrySink::new(registry)));
    }
    sinks
}

/// Counters reported by [`SinkHandle::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Envelopes taken off the queue by the actor
    pub processed: u64,

    /// Individual sink failures
    pub failures: u64,

    /// Envelopes dropped because the queue was full
    pub dropped: u64,
}

enum SinkMessage {
    Envelope(Box<MetricsEnvelope>),
    Stats {
        respond_to: oneshot::Sender<SinkStats>,
    },
    Shutdown,
}

/// Actor draining the envelope queue
struct SinkActor {
    sinks: Vec<Arc<dyn MetricsSink>>,
    queue: mpsc::Receiver<SinkMessage>,
    processed: u64,
    failures: u64,
}

impl SinkActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting sink actor with {} sink(s)", self.sinks.len());

        while let Some(message) = self.queue.recv().await {
            match message {
                SinkMessage::Envelope(envelope) => self.deliver(&envelope).await,

                SinkMessage::Stats { respond_to } => {
                    let _ = respond_to.send(SinkStats {
                        processed: self.processed,
                        failures: self.failures,
                        dropped: 0,
                    });
                }

                SinkMessage::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("sink actor stopped");
    }

    async fn deliver(&mut self, envelope: &MetricsEnvelope) {
        self.processed += 1;

        for sink in &self.sinks {
            if let Err(e) = sink.accept(envelope).await {
                self.failures += 1;
                warn!("sink '{}' failed for host {}: {e:#}", sink.name(), envelope.host);
            }
        }
    }
}

/// Non-blocking entry point to the sink actor
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct SinkHandle {
    sender: mpsc::Sender<SinkMessage>,
    dropped: Arc<AtomicU64>,
}

impl SinkHandle {
    /// Spawn a sink actor with a queue of `capacity` envelopes
    pub fn spawn(sinks: Vec<Arc<dyn MetricsSink>>, capacity: usize) -> Self {
        let (sender, queue) = mpsc::channel(capacity.max(1));

        let actor = SinkActor {
            sinks,
            queue,
            processed: 0,
            failures: 0,
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand an envelope off without waiting
    ///
    /// Returns `false` if the envelope was dropped (queue full or actor gone).
    pub fn accept(&self, envelope: MetricsEnvelope) -> bool {
        match self.sender.try_send(SinkMessage::Envelope(Box::new(envelope))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("sink queue full, dropped envelope ({dropped} dropped so far)");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("sink actor stopped, dropped envelope");
                false
            }
        }
    }

    /// Counters as of every envelope queued before this call
    pub async fn stats(&self) -> Result<SinkStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SinkMessage::Stats { respond_to: tx })
            .await
            .context("failed to send Stats command")?;

        let mut stats = rx.await.context("failed to receive response")?;
        stats.dropped = self.dropped.load(Ordering::Relaxed);
        Ok(stats)
    }

    /// Stop the actor after the envelopes already queued
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SinkMessage::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
