use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use process_dashboard::{
    notifier::{self, ChannelConfig, DeliveryMode, NotifierConfig, PAGERDUTY_EVENTS_URL},
    server::TransportTimeouts,
    telemetry,
};
use tracing::{info, trace};

#[derive(Clone, Parser)]
#[command(about = "Alert webhook notifier")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "NOTIFIER_ADDR", default_value = "0.0.0.0:9090")]
    addr: SocketAddr,

    /// Slack incoming webhook URL
    #[arg(long, env = "SLACK_WEBHOOK")]
    slack_webhook: Option<String>,

    /// PagerDuty Events API routing key
    #[arg(long, env = "PAGERDUTY_TOKEN")]
    pagerduty_token: Option<String>,

    /// SMTP relay host for the email channel
    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    /// Whether configured channels actually send
    #[arg(long, env = "DELIVERY_MODE", value_enum, default_value_t = DeliveryMode::Log)]
    delivery: DeliveryMode,

    /// PagerDuty Events API endpoint
    #[arg(long, env = "PAGERDUTY_EVENTS_URL", default_value = PAGERDUTY_EVENTS_URL)]
    pagerduty_url: String,

    /// Upper bound for a single channel send
    #[arg(long, default_value_t = 5)]
    send_timeout_secs: u64,

    /// Increase log verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("addr", &self.addr)
            .field("slack_webhook", &self.slack_webhook.as_ref().map(|_| "<set>"))
            .field("pagerduty_token", &self.pagerduty_token.as_ref().map(|_| "<set>"))
            .field("smtp_host", &self.smtp_host)
            .field("delivery", &self.delivery)
            .field("pagerduty_url", &self.pagerduty_url)
            .field("send_timeout_secs", &self.send_timeout_secs)
            .finish()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    telemetry::init("procdash_notifier", telemetry::level_for(args.verbose));
    trace!("started with args: {args:?}");

    let config = NotifierConfig {
        bind_addr: args.addr,
        channels: ChannelConfig::new(args.slack_webhook, args.pagerduty_token, args.smtp_host),
        delivery: args.delivery,
        pagerduty_url: args.pagerduty_url,
        send_timeout: Duration::from_secs(args.send_timeout_secs),
        timeouts: TransportTimeouts::http(),
    };

    let listening = notifier::spawn_notifier(&config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    listening.shutdown();

    Ok(())
}
