use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.wpp-admin/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub delay_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { delay_seconds: 1 }
    }
}

impl DispatchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub qr_interval_ms: u64,
    pub fleet_interval_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            qr_interval_ms: 5000,
            fleet_interval_seconds: 30,
        }
    }
}

impl PollerConfig {
    pub fn qr_interval(&self) -> Duration {
        Duration::from_millis(self.qr_interval_ms.max(1))
    }

    pub fn fleet_interval(&self) -> Duration {
        Duration::from_secs(self.fleet_interval_seconds.max(1))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("WPP_ADMIN_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.wpp-admin/wpp-admin.json"))
}

pub fn load_config() -> Config {
    load_config_from(&resolve_config_path())
}

/// Defaults, then the JSON file at `path` if it parses, then env overrides.
pub fn load_config_from(path: &Path) -> Config {
    let mut cfg = Config::default();

    if path.exists() {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => warn!("ignoring malformed config {}: {err}", path.display()),
            },
            Err(err) => warn!("cannot read config {}: {err}", path.display()),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn apply_env_overrides(cfg: &mut Config) {
    if let Some(endpoint) = env_value("WPP_API_ENDPOINT") {
        cfg.api.endpoint = endpoint;
    }

    if let Some(url) = env_value("WPP_ADMIN_DATABASE_URL") {
        cfg.database.url = Some(url);
    }

    if let Some(path) = env_value("WPP_ADMIN_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }

    if let Some(ms) = env_value("WPP_QR_POLL_INTERVAL_MS").and_then(|v| v.trim().parse().ok()) {
        cfg.poller.qr_interval_ms = ms;
    }

    if let Some(secs) = env_value("WPP_BULK_DELAY_SECONDS").and_then(|v| v.trim().parse().ok()) {
        cfg.dispatch.delay_seconds = secs;
    }
}

pub fn ensure_config_dir() {
    let path = resolve_config_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
