//! Operations plane of the process dashboard
//!
//! - [`collector`]: mTLS metrics ingestion (`POST /metrics`)
//! - [`notifier`]: alert webhook fan-out (`POST /alert`)
//! - [`api`]: bearer-gated read gateway
//! - [`agent`]: per-host push agent

#[cfg(feature = "agent")]
pub mod agent;
pub mod api;
pub mod collector;
pub mod config;
pub mod notifier;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod tls;
pub mod validation;
