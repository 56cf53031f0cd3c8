use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use process_dashboard::{
    api::{self, ApiConfig, ApiState, GatewayMetrics},
    config::{non_empty, read_hosts_file},
    registry::InMemoryRegistry,
    server::TransportTimeouts,
    telemetry,
};
use tracing::{info, trace};

#[derive(Clone, Parser)]
#[command(about = "Bearer-gated query gateway")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Only accept this bearer token (any token is accepted when unset)
    #[arg(long, env = "API_TOKEN")]
    api_token: Option<String>,

    /// JSON file seeding the host registry
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("addr", &self.addr)
            .field("api_token", &self.api_token.as_ref().map(|_| "<set>"))
            .field("hosts_file", &self.hosts_file)
            .finish()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    telemetry::init("procdash_gateway", telemetry::level_for(args.verbose));
    trace!("started with args: {args:?}");

    let registry = match &args.hosts_file {
        Some(path) => {
            let seed = read_hosts_file(path)?;
            InMemoryRegistry::with_hosts(seed.hosts)
        }
        None => InMemoryRegistry::new(),
    };
    info!("serving {} known host(s)", registry.len().await);

    let metrics = GatewayMetrics::new().context("failed to register gateway metrics")?;
    let state = ApiState::new(Arc::new(registry), Arc::new(metrics));

    let config = ApiConfig {
        bind_addr: args.addr,
        auth_token: non_empty(args.api_token),
        timeouts: TransportTimeouts::http(),
    };

    let listening = api::spawn_api_server(&config, state).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    listening.shutdown();

    Ok(())
}
