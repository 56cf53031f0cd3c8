//! Collector ingestion over real mTLS connections

use std::sync::Arc;

use process_dashboard::collector::{
    self, CollectorConfig, LoggingSink, MetricsSink, RegistrySink, SinkHandle,
};
use process_dashboard::registry::{HostRegistry, InMemoryRegistry};
use process_dashboard::server::{Listening, TransportTimeouts};
use process_dashboard::tls::TlsPaths;

use crate::helpers::{TestPki, any_port, envelope};

struct Collector {
    listening: Listening,
    sink: SinkHandle,
    registry: Arc<InMemoryRegistry>,
}

impl Collector {
    fn url(&self) -> String {
        format!("https://127.0.0.1:{}/metrics", self.listening.local_addr().port())
    }
}

async fn start_collector(pki: &TestPki, enforce_host_identity: bool) -> Collector {
    let registry = Arc::new(InMemoryRegistry::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![
        Arc::new(LoggingSink),
        Arc::new(RegistrySink::new(registry.clone())),
    ];
    let sink = SinkHandle::spawn(sinks, 64);

    let config = CollectorConfig {
        bind_addr: any_port(),
        tls: pki.server.clone(),
        enforce_host_identity,
        timeouts: TransportTimeouts::collector(),
    };

    let listening = collector::spawn_collector(&config, sink.clone())
        .await
        .unwrap();

    Collector {
        listening,
        sink,
        registry,
    }
}

#[tokio::test]
async fn test_valid_client_certificate_is_accepted() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;

    let response = pki
        .https_client(Some("web-1"))
        .post(collector.url())
        .json(&envelope("web-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    // stats round-trips through the sink actor, so the envelope has been handled
    assert_eq!(collector.sink.stats().await.unwrap().processed, 1);
    let hosts = collector.registry.hosts().await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].host, "web-1");
}

#[tokio::test]
async fn test_missing_client_certificate_fails_handshake() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;

    let result = pki
        .https_client(None)
        .post(collector.url())
        .json(&envelope("web-1"))
        .send()
        .await;

    assert!(result.is_err());
    assert_eq!(collector.sink.stats().await.unwrap().processed, 0);
}

#[tokio::test]
async fn test_untrusted_client_certificate_fails_handshake() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;

    let result = pki
        .untrusted_client("web-1")
        .post(collector.url())
        .json(&envelope("web-1"))
        .send()
        .await;

    assert!(result.is_err());
    assert!(collector.registry.is_empty().await);
}

#[tokio::test]
async fn test_host_mismatch_is_forbidden() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;

    let response = pki
        .https_client(Some("web-1"))
        .post(collector.url())
        .json(&envelope("db-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert_eq!(collector.sink.stats().await.unwrap().processed, 0);
}

#[tokio::test]
async fn test_host_mismatch_allowed_when_binding_disabled() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, false).await;

    let response = pki
        .https_client(Some("web-1"))
        .post(collector.url())
        .json(&envelope("db-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    collector.sink.stats().await.unwrap();
    assert_eq!(collector.registry.hosts().await.unwrap()[0].host, "db-1");
}

#[tokio::test]
async fn test_malformed_payloads_are_rejected() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;
    let client = pki.https_client(Some("web-1"));

    for body in [
        "{not json".to_string(),
        r#"{"timestamp":"2024-05-01T12:00:00Z","host":"","metrics":{}}"#.to_string(),
        r#"{"timestamp":"2024-05-01T12:00:00Z","host":"web-1","metrics":null}"#.to_string(),
        r#"{"timestamp":"not a time","host":"web-1","metrics":{}}"#.to_string(),
    ] {
        let response = client
            .post(collector.url())
            .header("content-type", "application/json")
            .body(body.clone())
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400, "{body}");
    }

    assert_eq!(collector.sink.stats().await.unwrap().processed, 0);
}

#[tokio::test]
async fn test_wrong_method_and_path() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;
    let client = pki.https_client(Some("web-1"));

    let response = client.get(collector.url()).send().await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.text().await.unwrap(), "Only POST allowed");

    let other = collector.url().replace("/metrics", "/other");
    let response = client.post(&other).send().await.unwrap();
    assert_eq!(response.status(), 404);

    let response = client.get(&other).send().await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_connection_is_reused_for_several_envelopes() {
    let pki = TestPki::new();
    let collector = start_collector(&pki, true).await;
    let client = pki.https_client(Some("web-1"));

    for _ in 0..5 {
        let response = client
            .post(collector.url())
            .json(&envelope("web-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    assert_eq!(collector.sink.stats().await.unwrap().processed, 5);
}

#[tokio::test]
async fn test_broken_tls_material_is_fatal_before_bind() {
    let pki = TestPki::new();
    let sink = SinkHandle::spawn(vec![], 1);

    let config = CollectorConfig {
        bind_addr: any_port(),
        tls: TlsPaths {
            ca_bundle: pki.dir.path().join("missing-ca.pem"),
            ..pki.server.clone()
        },
        enforce_host_identity: true,
        timeouts: TransportTimeouts::collector(),
    };

    let err = collector::spawn_collector(&config, sink).await.unwrap_err();
    assert!(format!("{err:#}").contains("CA bundle"));
}
