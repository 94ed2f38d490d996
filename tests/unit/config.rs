use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use wpp_admin::config::{expand_tilde, load_config_from, resolve_database_url, Config};

#[test]
fn test_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.api.endpoint, "http://localhost:8000");
    assert_eq!(cfg.api.timeout_seconds, 30);
    assert_eq!(cfg.dispatch.delay_seconds, 1);
    assert_eq!(cfg.poller.qr_interval_ms, 5000);
    assert_eq!(cfg.poller.fleet_interval_seconds, 30);
}

#[test]
fn test_default_database_config() {
    let cfg = Config::default();
    assert!(cfg.database.url.is_none());
    assert_eq!(cfg.database.sqlite_path, "~/.wpp-admin/state.sqlite");
}

#[test]
fn test_expand_tilde_relative_untouched() {
    assert_eq!(expand_tilde("relative/state.sqlite"), PathBuf::from("relative/state.sqlite"));
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.json"));
    assert_eq!(cfg.api.timeout(), Duration::from_secs(30));
}

#[test]
fn test_full_file_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wpp-admin.json");
    fs::write(
        &path,
        r#"{
            "api": {"endpoint": "https://wpp.example.com", "timeout_seconds": 10},
            "database": {"url": "sqlite::memory:"},
            "dispatch": {"delay_seconds": 3},
            "poller": {"qr_interval_ms": 8000, "fleet_interval_seconds": 60}
        }"#,
    )
    .unwrap();
    let cfg = load_config_from(&path);
    assert_eq!(cfg.api.timeout(), Duration::from_secs(10));
    assert_eq!(cfg.dispatch.delay(), Duration::from_secs(3));
    assert_eq!(cfg.poller.qr_interval(), Duration::from_millis(8000));
    assert_eq!(cfg.poller.fleet_interval(), Duration::from_secs(60));
    assert_eq!(resolve_database_url(&cfg), "sqlite::memory:");
    assert_eq!(cfg.database.sqlite_path, "~/.wpp-admin/state.sqlite");
}

#[test]
fn test_zero_intervals_are_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wpp-admin.json");
    fs::write(&path, r#"{"poller": {"qr_interval_ms": 0, "fleet_interval_seconds": 0}}"#).unwrap();
    let cfg = load_config_from(&path);
    assert_eq!(cfg.poller.qr_interval(), Duration::from_millis(1));
    assert_eq!(cfg.poller.fleet_interval(), Duration::from_secs(1));
}

#[test]
fn test_config_serializes_round_trip() {
    let cfg = Config::default();
    let raw = serde_json::to_string(&cfg).unwrap();
    let back: Config = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.api.endpoint, cfg.api.endpoint);
    assert_eq!(back.dispatch.delay_seconds, cfg.dispatch.delay_seconds);
}
