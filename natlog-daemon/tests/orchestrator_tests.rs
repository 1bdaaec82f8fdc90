//! Orchestrator lifecycle tests with in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use natlog_core::config::NatlogConfig;
use natlog_daemon::orchestrator::Orchestrator;
use natlog_pipeline::{FieldValue, MemoryStorage};
use tokio::net::UdpSocket;

/// Config with ephemeral UDP, metrics off, and a one-field rule.
fn test_config(api_enabled: bool) -> NatlogConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"

[syslog]
udp_bind = "127.0.0.1:0"
shutdown_timeout_secs = 2

[[syslog.rules]]
name = "ports"
table = "natlog.ports"
pattern = 'port=(\d+)'
fields = [{{ name = "port", type = "uint16" }}]

[storage]
batch_size = 1

[api]
enabled = {api_enabled}
bind = "127.0.0.1:0"

[metrics]
enabled = false
"#
    );
    NatlogConfig::parse(&toml_str).expect("failed to parse test config")
}

#[tokio::test]
async fn test_run_until_shutdown_stores_rows() {
    // Given: A started orchestrator over in-memory storage
    let storage = MemoryStorage::new();
    let mut orchestrator =
        Orchestrator::build_with_storage(test_config(false), Arc::new(storage.clone()))
            .expect("orchestrator should build");
    orchestrator.start().await.expect("orchestrator should start");
    assert!(orchestrator.health().await.is_healthy());

    // When: A matching line arrives over UDP
    let target = orchestrator
        .pipeline()
        .udp_local_addr()
        .expect("udp collector bound");
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");
    client
        .send_to(b"<134>Jan 15 12:00:00 fw nat: port=8080", target)
        .await
        .expect("send datagram");

    for _ in 0..100 {
        if storage.total_rows() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Then: The row is committed and a clean shutdown returns Ok
    assert_eq!(storage.rows("natlog.ports"), vec![vec![FieldValue::UInt16(8080)]]);
    let result = orchestrator.wait(async { "test" }).await;
    assert!(result.is_ok());
    assert!(orchestrator.health().await.is_unhealthy());
}

#[tokio::test]
async fn test_fatal_listener_error_fails_run() {
    let mut orchestrator =
        Orchestrator::build_with_storage(test_config(false), Arc::new(MemoryStorage::new()))
            .expect("orchestrator should build");
    orchestrator.start().await.expect("orchestrator should start");

    // RFC 5424 message with neither structured data nor MSG
    let target = orchestrator
        .pipeline()
        .udp_local_addr()
        .expect("udp collector bound");
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");
    client
        .send_to(b"<34>1 2024-01-15T12:00:00Z host app - - -", target)
        .await
        .expect("send datagram");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.wait(std::future::pending()),
    )
    .await
    .expect("fatal error should end the main loop");
    let err = result.expect_err("fatal error should be returned");
    assert!(err.to_string().contains("pipeline failed"));
}

#[tokio::test]
async fn test_start_fails_when_storage_unreachable() {
    let storage = MemoryStorage::new();
    storage.fail_ping(true);
    let mut orchestrator = Orchestrator::build_with_storage(test_config(false), Arc::new(storage))
        .expect("orchestrator should build");

    let err = orchestrator.start().await.expect_err("start should fail");
    assert!(err.to_string().contains("failed to start pipeline"));
}

#[tokio::test]
async fn test_api_served_while_running() {
    let mut orchestrator =
        Orchestrator::build_with_storage(test_config(true), Arc::new(MemoryStorage::new()))
            .expect("orchestrator should build");
    orchestrator.start().await.expect("orchestrator should start");

    let addr = orchestrator.api_addr().expect("api bound");
    let response = reqwest::get(format!("http://{addr}/readiness"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    orchestrator
        .wait(async { "test" })
        .await
        .expect("clean shutdown");
}

#[test]
fn test_build_with_invalid_config_fails() {
    let mut config = test_config(false);
    config.storage.batch_size = 0;
    let result = Orchestrator::build_with_storage(config, Arc::new(MemoryStorage::new()));
    assert!(result.is_err());
}
