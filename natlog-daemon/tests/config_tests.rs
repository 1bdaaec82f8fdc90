//! Configuration loading tests: example file, env overrides, CLI overrides.

use std::path::PathBuf;

use clap::Parser;
use natlog_core::config::{ExecFailurePolicy, NatlogConfig};
use natlog_daemon::cli::DaemonCli;
use serial_test::serial;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../natlog.toml.example")
}

#[tokio::test]
async fn test_example_config_loads() {
    let config = NatlogConfig::from_file(example_path())
        .await
        .expect("example config should load");

    assert_eq!(config.syslog.udp_bind, "0.0.0.0:514");
    assert_eq!(config.syslog.rules.len(), 2);
    assert_eq!(config.storage.batch_size, 10_000);
    assert_eq!(config.storage.exec_failure_policy, ExecFailurePolicy::DiscardBatch);
    assert_eq!(config.api.bind, "0.0.0.0:8098");
}

#[tokio::test]
async fn test_example_rules_compile() {
    let config = NatlogConfig::from_file(example_path())
        .await
        .expect("example config should load");
    let (table, models) =
        natlog_pipeline::RuleTable::compile(&config.syslog.rules).expect("rules should compile");
    assert_eq!(table.len(), 2);
    assert!(models.contains_key("srx_nat_session"));
}

#[tokio::test]
async fn test_missing_config_file_fails() {
    let result = NatlogConfig::load("/nonexistent/natlog.toml").await;
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn test_env_then_cli_precedence() {
    // Given: A config file, an env override, and a CLI override for the same field
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("natlog.toml");
    std::fs::write(&path, "[general]\nlog_level = \"warn\"\n").expect("write config");

    // SAFETY: serialized with other env-mutating tests
    unsafe {
        std::env::set_var("NATLOG_GENERAL_LOG_LEVEL", "error");
        std::env::set_var("NATLOG_STORAGE_BATCH_SIZE", "500");
    }

    let mut config = NatlogConfig::load(&path).await.expect("config should load");

    unsafe {
        std::env::remove_var("NATLOG_GENERAL_LOG_LEVEL");
        std::env::remove_var("NATLOG_STORAGE_BATCH_SIZE");
    }

    assert_eq!(config.general.log_level, "error");
    assert_eq!(config.storage.batch_size, 500);

    let cli = DaemonCli::parse_from(["natlog-daemon", "--log-level", "debug"]);
    cli.apply_overrides(&mut config);
    assert_eq!(config.general.log_level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_log_format_rejected_after_cli_override() {
    let mut config = NatlogConfig::default();
    let cli = DaemonCli::parse_from(["natlog-daemon", "--log-format", "xml"]);
    cli.apply_overrides(&mut config);
    assert!(config.validate().is_err());
}
