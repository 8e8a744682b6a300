//! HTTP contract tests for the appliance client against a wiremock server.

use std::net::Ipv4Addr;
use std::time::Duration;

use leasesync_agent::error::SourceError;
use leasesync_agent::opnsense::{ARP_ENDPOINT, LEASES_ENDPOINT};
use leasesync_agent::source::{ApplianceClient, HostSource};
use leasesync_core::{MacAddress, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApplianceClient {
    ApplianceClient::with_http_client(
        server.uri(),
        "api-key",
        "api-secret",
        reqwest::Client::new(),
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
    )
}

#[tokio::test]
async fn test_fetch_leases_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEASES_ENDPOINT))
        .and(basic_auth("api-key", "api-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "rowCount": 3,
            "current": 1,
            "rows": [
                {"address": "192.168.1.20", "mac": "00:1B:44:11:3A:B7", "hostname": "laptop",
                 "state": "active", "ends": "2026/10/17 10:00:00", "if": "lan"},
                {"address": "192.168.1.21", "hostname": "no-mac", "state": "active"},
                {"address": "192.168.1.22", "mac": "00:1b:44:11:3a:b8", "state": "expired"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = client(&server).fetch_leases().await.unwrap();
    assert_eq!(batch.observations.len(), 1);
    assert_eq!(batch.rejected.len(), 1);

    let host = &batch.observations[0];
    assert_eq!(host.ip, Ipv4Addr::new(192, 168, 1, 20));
    assert_eq!(host.mac, Some(MacAddress::new([0x00, 0x1b, 0x44, 0x11, 0x3a, 0xb7])));
    assert_eq!(host.hostname.as_deref(), Some("laptop"));
}

#[tokio::test]
async fn test_fetch_arp_bare_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARP_ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ip": "192.168.1.1", "mac": "de:ad:be:ef:00:01", "intf": "igb1",
             "expired": false, "permanent": true, "manufacturer": ""},
            {"ip": "192.168.1.30", "mac": "de:ad:be:ef:00:30", "intf": "igb1", "expired": true}
        ])))
        .mount(&server)
        .await;

    let batch = client(&server).fetch_arp().await.unwrap();
    assert_eq!(batch.observations.len(), 2);
    assert!(batch.observations[0].mac.is_some());
    assert!(batch.observations[1].mac.is_none());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARP_ENDPOINT))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARP_ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .mount(&server)
        .await;

    let batch = client(&server).fetch_arp().await.unwrap();
    assert!(batch.observations.is_empty());
}

#[tokio::test]
async fn test_persistent_server_error_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEASES_ENDPOINT))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).fetch_leases().await.unwrap_err();
    assert!(matches!(err, SourceError::RetriesExhausted { attempts: 3, .. }), "{err:?}");
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEASES_ENDPOINT))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).fetch_leases().await.unwrap_err();
    assert!(matches!(err, SourceError::Status { status: 401, .. }));
}

#[tokio::test]
async fn test_missing_rows_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEASES_ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let err = client(&server).fetch_leases().await.unwrap_err();
    assert!(matches!(err, SourceError::Malformed { .. }));
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARP_ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).fetch_arp().await.unwrap_err();
    assert!(matches!(err, SourceError::Malformed { .. }));
}

#[tokio::test]
async fn test_timeout_is_retried_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEASES_ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"rows": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let client = ApplianceClient::with_http_client(
        server.uri(),
        "api-key",
        "api-secret",
        http,
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
    );

    let err = client.fetch_leases().await.unwrap_err();
    assert!(matches!(err, SourceError::RetriesExhausted { attempts: 3, .. }), "{err:?}");
}
