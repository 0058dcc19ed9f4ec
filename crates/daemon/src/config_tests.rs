// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

#[test]
fn defaults_are_sane() {
    let config = ServerConfig::default();
    assert_eq!(config.listen, vec!["127.0.0.1:6631"]);
    assert_eq!(config.max_clients, 100);
    assert_eq!(config.max_events, 100);
    assert_eq!(config.job_retry_interval, 30);
    assert_eq!(config.resolver_max_passes, 100);
    assert!(config.strict_policy_default);
    assert!(config.job_history);
    assert!(!config.job_auto_purge);
    assert!(config.spool_dir().ends_with("spool"));
}

#[test]
fn load_parses_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pressd.toml");
    std::fs::write(
        &path,
        r#"
server_name = "spool.example.com"
listen = ["0.0.0.0:631"]
state_dir = "/tmp/press-test"
max_clients = 5
job_auto_purge = true
printcap = "/tmp/printcap"
printcap_format = "solaris"
"#,
    )
    .unwrap();

    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.server_name, "spool.example.com");
    assert_eq!(config.listen, vec!["0.0.0.0:631"]);
    assert_eq!(config.max_clients, 5);
    assert!(config.job_auto_purge);
    assert_eq!(config.printcap_format(), press_storage::PrintcapFormat::Solaris);
    // Unset keys keep their defaults
    assert_eq!(config.max_events, 100);
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pressd.toml");
    std::fs::write(&path, "no_such_knob = 1\n").unwrap();
    assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn load_or_default_on_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.max_clients, 100);
}

#[test]
fn bad_printcap_format_falls_back_to_bsd() {
    let mut config = ServerConfig::default();
    config.printcap_format = "weird".to_string();
    assert_eq!(config.printcap_format(), press_storage::PrintcapFormat::Bsd);
}
