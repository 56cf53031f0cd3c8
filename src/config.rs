use std::path::Path;

use serde::Deserialize;
use tracing::trace;

use crate::registry::HostRecord;

/// Seed file for the gateway's host registry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostsFile {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
}

pub fn read_hosts_file(path: impl AsRef<Path>) -> anyhow::Result<HostsFile> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid hosts file {}: {e}", path.display()))
        .inspect(|hosts: &HostsFile| trace!("loaded {} host(s) from {}", hosts.hosts.len(), path.display()))
}

/// Treat empty strings from flags or the environment as unset
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
