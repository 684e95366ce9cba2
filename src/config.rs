// Application configuration
//
// Read from `kwacha.toml` (or the file named by KWACHA_CONFIG). Every field
// has a default, so a missing file just means defaults plus environment
// overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "kwacha.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub exchange_rate: ExchangeRateConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kwacha.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; RUST_LOG wins when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "kwacha_ledger=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeRateConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            url: "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
            timeout_secs: 10,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

/// Scheduler intervals in seconds; 0 disables a job
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    pub recurring_interval_secs: u64,
    pub exchange_rate_interval_secs: u64,
    pub inflation_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recurring_interval_secs: 60 * 60,
            exchange_rate_interval_secs: 24 * 60 * 60,
            inflation_interval_secs: 30 * 24 * 60 * 60,
        }
    }
}

impl AppConfig {
    /// Load from KWACHA_CONFIG or `kwacha.toml`, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var("KWACHA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KWACHA_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("KWACHA_BIND") {
            self.server.bind = bind;
        }
        if let Some(filter) = lookup("KWACHA_LOG") {
            self.logging.filter = filter;
        }
        if let Some(url) = lookup("KWACHA_EXCHANGE_RATE_URL") {
            self.exchange_rate.url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            bind = "0.0.0.0:8080"

            [exchange_rate]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.exchange_rate.max_attempts, 5);
        assert_eq!(config.exchange_rate.timeout_secs, 10);
        assert_eq!(config.database.path, PathBuf::from("kwacha.db"));
        assert!(config.jobs.enabled);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.logging.filter, "kwacha_ledger=info");
    }

    #[test]
    fn test_file_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"/tmp/ledger.db\"\n[jobs]\nenabled = false").unwrap();
        let mut config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.db"));
        assert!(!config.jobs.enabled);

        let env: HashMap<&str, &str> = HashMap::from([
            ("KWACHA_BIND", "0.0.0.0:9000"),
            ("KWACHA_EXCHANGE_RATE_URL", "http://localhost:9999/rates"),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.exchange_rate.url, "http://localhost:9999/rates");
        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.db"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(AppConfig::from_toml("[server\nbind = 1").is_err());
    }
}
