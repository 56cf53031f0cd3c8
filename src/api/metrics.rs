//! Prometheus exposition for the gateway itself

use std::time::Instant;

use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Gateway metrics, registered in a private registry
pub struct GatewayMetrics {
    registry: Registry,
    started: Instant,
    uptime_seconds: Gauge,
    hosts_known: IntGauge,
    http_requests_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let uptime_seconds = Gauge::new("proc_dash_uptime_seconds", "Seconds since the gateway started")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let hosts_known = IntGauge::new("proc_dash_hosts_known", "Hosts currently in the registry")?;
        registry.register(Box::new(hosts_known.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("proc_dash_http_requests_total", "Requests served per route"),
            &["route"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            uptime_seconds,
            hosts_known,
            http_requests_total,
        })
    }

    /// Count one request to `route`
    pub fn observe_request(&self, route: &str) {
        self.http_requests_total.with_label_values(&[route]).inc();
    }

    /// Render the text exposition format
    pub fn render(&self, hosts_known: usize) -> Result<String, prometheus::Error> {
        self.uptime_seconds.set(self.started.elapsed().as_secs_f64());
        self.hosts_known.set(hosts_known as i64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
