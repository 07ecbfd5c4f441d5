use std::str::FromStr;

use serde::Deserialize;

type ConfigResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Relay settings. Every field but `jwt_secret` has a usable default, so an
/// empty file plus `JWT_SECRET` in the environment is a complete config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// sqlx SQLite URL; the file is created on first start.
    pub database_url: String,
    pub max_db_connections: u32,
    pub cors_origins: Vec<String>,
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// HS256 secret shared with the auth provider, at least 32 bytes.
    pub jwt_secret: String,
    /// Lifetime of tokens this relay issues itself (tests and local tooling).
    pub token_ttl_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            database_url: "sqlite://unme.db".into(),
            max_db_connections: 5,
            cors_origins: vec!["http://localhost:5173".into()],
            log_level: "info".into(),
            jwt_secret: String::new(),
            token_ttl_seconds: 3600,
        }
    }
}

/// Replace `target` with the parsed value of `name` when that variable is set.
fn override_from_env<T: FromStr>(target: &mut T, name: &str) -> ConfigResult<()> {
    if let Ok(raw) = std::env::var(name) {
        *target = raw
            .parse()
            .map_err(|_| format!("invalid {name} value: {raw}"))?;
    }
    Ok(())
}

impl ServerConfig {
    /// Read the TOML file named by `CONFIG_PATH` (default `config.toml`) and
    /// layer env overrides on top.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".into());
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read relay config {path}: {e}"))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let mut config: ServerConfig = toml::from_str(raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// A variable that is set but does not parse (`PORT=abc`) is an error,
    /// never silently ignored.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        override_from_env(&mut self.host, "HOST")?;
        override_from_env(&mut self.port, "PORT")?;
        override_from_env(&mut self.database_url, "DATABASE_URL")?;
        override_from_env(&mut self.max_db_connections, "MAX_DB_CONNECTIONS")?;
        override_from_env(&mut self.log_level, "LOG_LEVEL")?;
        override_from_env(&mut self.jwt_secret, "JWT_SECRET")?;
        override_from_env(&mut self.token_ttl_seconds, "TOKEN_TTL_SECONDS")?;
        if let Ok(raw) = std::env::var("CORS_ORIGINS") {
            self.cors_origins = raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }
}
