//! Host registry served by the gateway
//!
//! The gateway only ever reads from a [`HostRegistry`]. When the collector
//! serves the gateway in-process (`--gateway-addr`) its registry sink is the
//! writer; the standalone gateway serves whatever `--hosts-file` seeded.
//! [`InMemoryRegistry`] keeps the most recent `lastSeen` per host and loses
//! everything on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

/// One entry of `GET /api/v1/hosts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub host: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("host registry unavailable: {0}")]
    Unavailable(String),
}

/// Source of known hosts for the read API
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// All known hosts, sorted by name
    async fn hosts(&self) -> Result<Vec<HostRecord>, RegistryError>;

    /// Note that `host` reported at `seen`
    async fn record(&self, host: &str, seen: DateTime<Utc>) -> Result<(), RegistryError>;
}

/// Registry kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    hosts: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `records`, e.g. from a hosts file
    pub fn with_hosts(records: impl IntoIterator<Item = HostRecord>) -> Self {
        let hosts = records
            .into_iter()
            .map(|record| (record.host, record.last_seen))
            .collect();

        Self {
            hosts: RwLock::new(hosts),
        }
    }

    pub async fn len(&self) -> usize {
        self.hosts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hosts.read().await.is_empty()
    }
}

#[async_trait]
impl HostRegistry for InMemoryRegistry {
    async fn hosts(&self) -> Result<Vec<HostRecord>, RegistryError> {
        let hosts = self.hosts.read().await;
        let mut records: Vec<HostRecord> = hosts
            .iter()
            .map(|(host, last_seen)| HostRecord {
                host: host.clone(),
                last_seen: *last_seen,
            })
            .collect();

        records.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(records)
    }

    async fn record(&self, host: &str, seen: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut hosts = self.hosts.write().await;
        let last_seen = hosts.entry(host.to_string()).or_insert(seen);

        // out-of-order hand-offs never move lastSeen backwards
        if seen > *last_seen {
            *last_seen = seen;
        }

        trace!("recorded {host} at {}", last_seen.to_rfc3339());
        Ok(())
    }
}
