use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use process_dashboard::{
    api::{self, ApiConfig, ApiState, GatewayMetrics},
    collector::{self, CollectorConfig, SinkHandle, collector_sinks},
    config::non_empty,
    registry::{HostRegistry, InMemoryRegistry},
    server::TransportTimeouts,
    telemetry,
    tls::TlsPaths,
};
use tracing::{info, trace};

#[derive(Clone, Parser)]
#[command(about = "mTLS metrics collector")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "COLLECTOR_ADDR", default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// Server certificate chain (PEM)
    #[arg(long, env = "TLS_CERT")]
    tls_cert: PathBuf,

    /// Server private key (PEM)
    #[arg(long, env = "TLS_KEY")]
    tls_key: PathBuf,

    /// CA bundle used to verify agent certificates (PEM)
    #[arg(long, env = "CA_BUNDLE")]
    ca_bundle: PathBuf,

    /// Accept envelopes for hosts not named by the client certificate
    #[arg(long)]
    allow_host_mismatch: bool,

    /// Envelopes buffered for the sink before new ones are dropped
    #[arg(long, default_value_t = 1024)]
    sink_queue: usize,

    /// Also serve the query gateway here, listing the hosts this collector hears from
    #[arg(long, env = "GATEWAY_ADDR")]
    gateway_addr: Option<SocketAddr>,

    /// Only accept this bearer token on the in-process gateway
    #[arg(long, env = "API_TOKEN")]
    api_token: Option<String>,

    /// Increase log verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("addr", &self.addr)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("ca_bundle", &self.ca_bundle)
            .field("allow_host_mismatch", &self.allow_host_mismatch)
            .field("sink_queue", &self.sink_queue)
            .field("gateway_addr", &self.gateway_addr)
            .field("api_token", &self.api_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    telemetry::init("procdash_collector", telemetry::level_for(args.verbose));
    trace!("started with args: {args:?}");

    let config = CollectorConfig {
        bind_addr: args.addr,
        tls: TlsPaths {
            cert: args.tls_cert,
            key: args.tls_key,
            ca_bundle: args.ca_bundle,
        },
        enforce_host_identity: !args.allow_host_mismatch,
        timeouts: TransportTimeouts::collector(),
    };

    let registry: Option<Arc<dyn HostRegistry>> = args
        .gateway_addr
        .map(|_| Arc::new(InMemoryRegistry::new()) as Arc<dyn HostRegistry>);

    let sink = SinkHandle::spawn(collector_sinks(registry.clone()), args.sink_queue);
    let listening = collector::spawn_collector(&config, sink.clone()).await?;

    let gateway = match (args.gateway_addr, registry) {
        (Some(bind_addr), Some(registry)) => {
            let metrics = GatewayMetrics::new().context("failed to register gateway metrics")?;
            let state = ApiState::new(registry, Arc::new(metrics));
            let config = ApiConfig {
                bind_addr,
                auth_token: non_empty(args.api_token),
                timeouts: TransportTimeouts::http(),
            };
            Some(api::spawn_api_server(&config, state).await?)
        }
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    listening.shutdown();
    if let Some(gateway) = &gateway {
        gateway.shutdown();
    }
    sink.shutdown().await?;

    Ok(())
}
