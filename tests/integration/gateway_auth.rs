//! Gateway over HTTP: bearer gate, host listing and exposition

use std::sync::Arc;

use process_dashboard::api::{self, ApiConfig, ApiState, GatewayMetrics};
use process_dashboard::config::read_hosts_file;
use process_dashboard::registry::InMemoryRegistry;
use process_dashboard::server::Listening;

use crate::helpers::{any_port, write};

async fn start_gateway(token: Option<&str>, registry: InMemoryRegistry) -> Listening {
    let state = ApiState::new(Arc::new(registry), Arc::new(GatewayMetrics::new().unwrap()));
    let config = ApiConfig {
        bind_addr: any_port(),
        auth_token: token.map(str::to_string),
        ..ApiConfig::default()
    };

    api::spawn_api_server(&config, state).await.unwrap()
}

fn url(listening: &Listening, path: &str) -> String {
    format!("http://{}{path}", listening.local_addr())
}

#[tokio::test]
async fn test_healthz_is_public() {
    let gateway = start_gateway(Some("s3cret"), InMemoryRegistry::new()).await;

    let response = reqwest::get(url(&gateway, "/healthz")).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"status":"ok"}"#);
}

#[tokio::test]
async fn test_malformed_authorization_is_unauthorized() {
    let gateway = start_gateway(None, InMemoryRegistry::new()).await;
    let client = reqwest::Client::new();

    let response = client.get(url(&gateway, "/api/v1/hosts")).send().await.unwrap();
    assert_eq!(response.status(), 401);

    for header in ["", "Bearer", "Bearer ", "Basic dXNlcjpwYXNz", "Bearer a b"] {
        let response = client
            .get(url(&gateway, "/api/v1/hosts"))
            .header("authorization", header)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401, "{header:?}");
    }
}

#[tokio::test]
async fn test_hosts_from_seed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "hosts.json",
        r#"{"hosts": [
            {"host": "web-2", "lastSeen": "2024-05-01T12:05:00Z"},
            {"host": "db-1", "lastSeen": "2024-05-01T12:00:00Z"}
        ]}"#,
    );
    let registry = InMemoryRegistry::with_hosts(read_hosts_file(&path).unwrap().hosts);
    let gateway = start_gateway(None, registry).await;

    let hosts: serde_json::Value = reqwest::Client::new()
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("any-token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        hosts,
        serde_json::json!([
            {"host": "db-1", "lastSeen": "2024-05-01T12:00:00Z"},
            {"host": "web-2", "lastSeen": "2024-05-01T12:05:00Z"}
        ])
    );
}

#[tokio::test]
async fn test_static_token() {
    let gateway = start_gateway(Some("s3cret"), InMemoryRegistry::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let registry = InMemoryRegistry::with_hosts(
        read_hosts_file_from_str(r#"{"hosts":[{"host":"a","lastSeen":"2024-05-01T12:00:00Z"}]}"#),
    );
    let gateway = start_gateway(None, registry).await;
    let client = reqwest::Client::new();

    client
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("t")
        .send()
        .await
        .unwrap();

    let response = client
        .get(url(&gateway, "/metrics/prometheus"))
        .bearer_auth("t")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    let text = response.text().await.unwrap();
    assert!(text.contains("proc_dash_uptime_seconds"));
    assert!(text.contains("proc_dash_hosts_known 1"));
    assert!(text.contains(r#"proc_dash_http_requests_total{route="/api/v1/hosts"} 1"#));
}

fn read_hosts_file_from_str(json: &str) -> Vec<process_dashboard::registry::HostRecord> {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "hosts.json", json);
    read_hosts_file(&path).unwrap().hosts
}

#[tokio::test]
async fn test_gateway_lists_hosts_reported_to_collector() {
    use process_dashboard::collector::{self, CollectorConfig, SinkHandle, collector_sinks};
    use process_dashboard::registry::HostRegistry;
    use process_dashboard::server::TransportTimeouts;

    use crate::helpers::{TestPki, envelope};

    let pki = TestPki::new();
    let registry: Arc<dyn HostRegistry> = Arc::new(InMemoryRegistry::new());

    let sink = SinkHandle::spawn(collector_sinks(Some(registry.clone())), 16);
    let collector = collector::spawn_collector(
        &CollectorConfig {
            bind_addr: any_port(),
            tls: pki.server.clone(),
            enforce_host_identity: true,
            timeouts: TransportTimeouts::collector(),
        },
        sink.clone(),
    )
    .await
    .unwrap();

    let state = ApiState::new(registry, Arc::new(GatewayMetrics::new().unwrap()));
    let gateway = api::spawn_api_server(
        &ApiConfig {
            bind_addr: any_port(),
            ..ApiConfig::default()
        },
        state,
    )
    .await
    .unwrap();

    let client = reqwest::Client::new();
    let hosts: serde_json::Value = client
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("t")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hosts, serde_json::json!([]));

    let response = pki
        .https_client(Some("web-1"))
        .post(format!(
            "https://127.0.0.1:{}/metrics",
            collector.local_addr().port()
        ))
        .json(&envelope("web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    sink.stats().await.unwrap();

    let hosts: Vec<serde_json::Value> = client
        .get(url(&gateway, "/api/v1/hosts"))
        .bearer_auth("t")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0]["host"], "web-1");
    assert!(hosts[0]["lastSeen"].is_string());
}
