//! Local system snapshots pushed by the agent

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Components, System};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetrics {
    pub system: SystemInformation,
    pub memory: MemoryInformation,
    pub cpus: CpuOverview,
    pub components: ComponentOverview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInformation {
    pub name: Option<String>,
    pub kernel_version: Option<String>,
    pub os_version: Option<String>,
    pub host_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInformation {
    pub total: u64,
    pub used: u64,
    pub total_swap: u64,
    pub used_swap: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuOverview {
    pub total: usize,
    pub arch: String,
    pub average_usage: f32,
    pub cpus: Vec<CpuInformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInformation {
    pub name: String,
    pub frequency: u64,
    pub usage: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentOverview {
    pub average_temperature: Option<f32>,
    pub components: Vec<ComponentInformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInformation {
    pub name: String,
    pub temperature: Option<f32>,
}

/// Produces the `metrics` blob of each pushed envelope
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<serde_json::Value>;
}

/// Snapshots of the machine the agent runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSnapshot;

impl SystemSnapshot {
    /// Sample the system, blocking for the CPU measurement window
    pub fn collect() -> HostMetrics {
        let mut sys = System::new_all();
        sys.refresh_all();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_all();

        let cpus = sys.cpus();
        let components = Components::new_with_refreshed_list();

        let average_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperatures: Vec<f32> = components
            .iter()
            .filter_map(|component| component.temperature())
            .collect();
        let average_temperature = (!temperatures.is_empty())
            .then(|| temperatures.iter().sum::<f32>() / temperatures.len() as f32);

        HostMetrics {
            system: SystemInformation {
                name: System::name(),
                kernel_version: System::kernel_version(),
                os_version: System::os_version(),
                host_name: System::host_name(),
            },
            memory: MemoryInformation {
                total: sys.total_memory(),
                used: sys.used_memory(),
                total_swap: sys.total_swap(),
                used_swap: sys.used_swap(),
            },
            cpus: CpuOverview {
                total: cpus.len(),
                arch: System::cpu_arch(),
                average_usage,
                cpus: cpus
                    .iter()
                    .map(|cpu| CpuInformation {
                        name: cpu.name().to_string(),
                        frequency: cpu.frequency(),
                        usage: cpu.cpu_usage(),
                    })
                    .collect(),
            },
            components: ComponentOverview {
                average_temperature,
                components: components
                    .iter()
                    .map(|component| ComponentInformation {
                        name: component.label().to_string(),
                        temperature: component.temperature(),
                    })
                    .collect(),
            },
        }
    }
}

#[async_trait]
impl SnapshotSource for SystemSnapshot {
    async fn snapshot(&self) -> Result<serde_json::Value> {
        let metrics = tokio::task::spawn_blocking(Self::collect)
            .await
            .context("snapshot task failed")?;

        serde_json::to_value(metrics).context("failed to encode snapshot")
    }
}
