use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::ChannelConfig;

/// Client configuration loaded from a TOML file with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint. Default: "ws://127.0.0.1:3000/ws"
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Relay REST base URL. Default: "http://127.0.0.1:3000"
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Device-local key store file. Default: "unme-keys.db"
    #[serde(default = "default_key_store_path")]
    pub key_store_path: PathBuf,
    /// Default: 5
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Default: 3000
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// History polling interval of the HTTP message store. Default: 2000
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}
fn default_api_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_key_store_path() -> PathBuf {
    PathBuf::from("unme-keys.db")
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_interval_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
            key_store_path: default_key_store_path(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load from `CONFIG_PATH` (default `unme-chat.toml`). A missing file
    /// means defaults; env overrides apply either way.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "unme-chat.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::from_toml_str(""),
            Err(e) => Err(format!("failed to read {path}: {e}").into()),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ClientConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `UNME_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("UNME_WS_URL") {
            self.ws_url = val;
        }
        if let Ok(val) = std::env::var("UNME_API_URL") {
            self.api_url = val;
        }
        if let Ok(val) = std::env::var("UNME_KEY_STORE_PATH") {
            self.key_store_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("UNME_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = val
                .parse()
                .map_err(|_| format!("invalid UNME_MAX_RECONNECT_ATTEMPTS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("UNME_RECONNECT_INTERVAL_MS") {
            self.reconnect_interval_ms = val
                .parse()
                .map_err(|_| format!("invalid UNME_RECONNECT_INTERVAL_MS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("UNME_POLL_INTERVAL_MS") {
            self.poll_interval_ms = val
                .parse()
                .map_err(|_| format!("invalid UNME_POLL_INTERVAL_MS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("UNME_LOG_LEVEL") {
            self.log_level = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".into());
        }
        Ok(())
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            ..ChannelConfig::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
