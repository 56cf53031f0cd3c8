//! Notifier end to end: HTTP in, channel senders out

use std::time::Duration;

use process_dashboard::notifier::{self, ChannelConfig, DeliveryMode, NotifierConfig};
use process_dashboard::server::{Listening, TransportTimeouts};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::any_port;

async fn start_notifier(channels: ChannelConfig, pagerduty_url: String) -> Listening {
    let config = NotifierConfig {
        bind_addr: any_port(),
        channels,
        delivery: DeliveryMode::Live,
        pagerduty_url,
        send_timeout: Duration::from_secs(2),
        timeouts: TransportTimeouts::http(),
    };

    notifier::spawn_notifier(&config).await.unwrap()
}

fn alert_url(listening: &Listening) -> String {
    format!("http://{}/alert", listening.local_addr())
}

const ONE_ALERT: &str =
    r#"{"alerts":[{"status":"firing","labels":{"host":"h1","alertname":"CPUHigh"}}]}"#;

#[tokio::test]
async fn test_alert_reaches_slack_and_pagerduty() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .and(body_json(json!({"text": "Host 'h1' alert 'CPUHigh' is firing"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&downstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/pagerduty"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&downstream)
        .await;

    let listening = start_notifier(
        ChannelConfig::new(
            Some(format!("{}/slack", downstream.uri())),
            Some("routing-key".to_string()),
            Some("smtp.example.com".to_string()),
        ),
        format!("{}/pagerduty", downstream.uri()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(alert_url(&listening))
        .body(ONE_ALERT)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Received");
    downstream.verify().await;
}

#[tokio::test]
async fn test_failing_channel_still_answers_received() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&downstream)
        .await;

    let listening = start_notifier(
        ChannelConfig::new(Some(downstream.uri()), None, None),
        String::new(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(alert_url(&listening))
        .body(r#"{"alerts":[{"status":"firing"},{"status":"resolved"}]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Received");
}

#[tokio::test]
async fn test_slow_channel_does_not_fail_the_request() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&downstream)
        .await;

    let listening = start_notifier(
        ChannelConfig::new(Some(downstream.uri()), None, Some("smtp.example.com".to_string())),
        String::new(),
    )
    .await;

    let started = std::time::Instant::now();
    let response = reqwest::Client::new()
        .post(alert_url(&listening))
        .body(ONE_ALERT)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_no_channels_and_empty_batches() {
    let listening = start_notifier(ChannelConfig::default(), String::new()).await;
    let client = reqwest::Client::new();

    for body in [ONE_ALERT, "{}", r#"{"alerts":[]}"#] {
        let response = client
            .post(alert_url(&listening))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{body}");
    }
}

#[tokio::test]
async fn test_resubmitted_batch_is_dispatched_again() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&downstream)
        .await;

    let listening = start_notifier(
        ChannelConfig::new(Some(downstream.uri()), None, None),
        String::new(),
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(alert_url(&listening))
            .body(ONE_ALERT)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    downstream.verify().await;
}

#[tokio::test]
async fn test_invalid_batch_sends_nothing() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let listening = start_notifier(
        ChannelConfig::new(Some(downstream.uri()), None, None),
        String::new(),
    )
    .await;
    let client = reqwest::Client::new();

    for body in ["{oops", r#"{"alerts":[{"status":"pending"}]}"#, r#"{"alerts":{}}"#] {
        let response = client
            .post(alert_url(&listening))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{body}");
    }

    let response = client.get(alert_url(&listening)).send().await.unwrap();
    assert_eq!(response.status(), 405);

    downstream.verify().await;
}
