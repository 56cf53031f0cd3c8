use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use process_dashboard::{
    agent::{self, AgentConfig, AgentHandle, SystemSnapshot},
    telemetry,
};
use tracing::{info, trace};

#[derive(Debug, Clone, Parser)]
#[command(about = "Push local system metrics to the collector")]
struct Args {
    /// Collector ingestion URL
    #[arg(long, env = "COLLECTOR_URL", default_value = "https://localhost:8443/metrics")]
    collector_url: String,

    /// Client certificate (PEM)
    #[arg(long, env = "AGENT_CERT")]
    cert: PathBuf,

    /// Client private key (PEM)
    #[arg(long, env = "AGENT_KEY")]
    key: PathBuf,

    /// CA bundle the collector certificate must chain to (PEM)
    #[arg(long, env = "CA_BUNDLE")]
    ca_bundle: PathBuf,

    /// Host name to report (defaults to the system host name)
    #[arg(long, env = "AGENT_HOST")]
    host: Option<String>,

    /// Seconds between pushes
    #[arg(long, default_value_t = 15)]
    interval: u64,

    /// Increase log verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    telemetry::init("procdash_agent", telemetry::level_for(args.verbose));
    trace!("started with args: {args:?}");

    let host = args
        .host
        .filter(|host| !host.trim().is_empty())
        .or_else(agent::local_host_name)
        .context("no host name given and the system reports none")?;

    let config = AgentConfig {
        collector_url: args.collector_url,
        cert: args.cert,
        key: args.key,
        ca_bundle: args.ca_bundle,
        host,
        interval: Duration::from_secs(args.interval.max(1)),
    };

    let client = agent::build_client(&config)?;
    info!("pushing metrics for {} to {}", config.host, config.collector_url);

    let handle = AgentHandle::spawn(config, client, Arc::new(SystemSnapshot));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    handle.shutdown().await?;

    Ok(())
}
