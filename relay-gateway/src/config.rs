use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Process configuration, loaded from an optional YAML file with
/// environment-variable overrides on top. A `.env` file, if present, is
/// read first and never overrides variables already set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Chat messages admitted per user per window.
    pub chat_limit: u64,
    pub chat_window_secs: u64,
    /// Auth attempts admitted per identity per window.
    pub auth_limit: u64,
    pub auth_window_secs: u64,
    /// Persistence worker pool size.
    pub queue_workers: usize,
    /// Attempts per task before a transient failure becomes permanent.
    pub queue_max_attempts: u32,
    /// Shared broker URL. Absent means in-process backends (single
    /// process, tests, local development).
    pub redis_url: Option<String>,
    /// Postgres URL. Absent means the in-memory store.
    pub database_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chat_limit: 5,
            chat_window_secs: 60,
            auth_limit: 10,
            auth_window_secs: 60,
            queue_workers: 4,
            queue_max_attempts: 3,
            redis_url: None,
            database_url: None,
        }
    }
}

impl RelayConfig {
    /// Load from `path` if it exists, else start from defaults; then apply
    /// `RELAY_*`, `REDIS_URL` and `DATABASE_URL` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(Box::new(e)))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(ConfigError::Io(err)),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("RELAY_CHAT_LIMIT") {
            self.chat_limit = v;
        }
        if let Some(v) = env_parse("RELAY_CHAT_WINDOW_SECS") {
            self.chat_window_secs = v;
        }
        if let Some(v) = env_parse("RELAY_AUTH_LIMIT") {
            self.auth_limit = v;
        }
        if let Some(v) = env_parse("RELAY_AUTH_WINDOW_SECS") {
            self.auth_window_secs = v;
        }
        if let Some(v) = env_parse("RELAY_QUEUE_WORKERS") {
            self.queue_workers = v;
        }
        if let Some(v) = env_parse("RELAY_QUEUE_MAX_ATTEMPTS") {
            self.queue_max_attempts = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = Some(v);
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Configuration load failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config read: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = RelayConfig::default();
        assert_eq!(config.chat_limit, 5);
        assert_eq!(config.auth_limit, 10);
        assert_eq!(config.chat_window_secs, 60);
        assert_eq!(config.queue_workers, 4);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config: RelayConfig = serde_yaml::from_str("chat_limit: 20\nqueue_workers: 2\n").unwrap();
        assert_eq!(config.chat_limit, 20);
        assert_eq!(config.queue_workers, 2);
        assert_eq!(config.auth_limit, 10);
    }
}
