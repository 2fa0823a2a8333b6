use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable store parameters. The store is an embedded SQLite file, so the
/// database "name" is its path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
    /// Immediate retries of a durable write after a transient failure (capped at 1)
    pub write_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/conversations.db".to_string(),
            busy_timeout_ms: 5_000,
            write_retries: 1,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Redis,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub recent_ttl_secs: u64,
    pub summary_ttl_secs: u64,
    pub recent_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            recent_ttl_secs: 3_600,
            summary_ttl_secs: 86_400,
            recent_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub channel_buffer_size: usize,
    pub reap_interval_ms: u64,
    /// Background sends allowed to wait for channel capacity before drafts are dropped
    pub overflow_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 256,
            reap_interval_ms: 1_000,
            overflow_limit: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Layered load: defaults, then `config/{CONFIG_ENV}`, then `APP__*` env vars
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Load from an explicit file, still honoring `APP__*` overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Settings for tests and embedding: in-memory cache, given database path
    pub fn ephemeral(database_path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig {
                path: database_path.into(),
                ..DatabaseConfig::default()
            },
            ..Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
        assert_eq!(settings.cache.recent_capacity, 50);
        assert_eq!(settings.cache.summary_ttl_secs, 86_400);
        assert_eq!(settings.database.write_retries, 1);
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/convlog-test.db"

[cache]
backend = "redis"
host = "redis.local"
recent_capacity = 20
"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.database.path, "/tmp/convlog-test.db");
        assert_eq!(settings.database.busy_timeout_ms, 5_000);
        assert_eq!(settings.cache.backend, CacheBackendKind::Redis);
        assert_eq!(settings.cache.host, "redis.local");
        assert_eq!(settings.cache.port, 6379);
        assert_eq!(settings.cache.recent_capacity, 20);
        assert_eq!(settings.logging.level, "info");
    }
}
