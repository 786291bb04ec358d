//! Configuration module for feedpulse.

use serde::Deserialize;
use std::path::Path;

use crate::{FeedPulseError, Result};

/// Callback listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8723
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedpulse.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedpulse.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Scheduler and backoff configuration.
///
/// These values are pure inputs to the job store and backoff calculator;
/// they are constructed once at startup and never mutated at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent worker loops to run.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Seconds a worker sleeps when no job is eligible.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds after which an unfinished claim is presumed abandoned.
    #[serde(default = "default_claim_stale")]
    pub claim_stale_secs: i64,
}

fn default_worker_count() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    15
}

fn default_claim_stale() -> i64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_secs: default_poll_interval(),
            claim_stale_secs: default_claim_stale(),
        }
    }
}

/// WebSub (push subscription) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSubConfig {
    /// Whether push subscriptions are enabled at all.
    ///
    /// When false, feeds are kept fresh by polling alone.
    #[serde(default = "default_websub_enabled")]
    pub enabled: bool,
    /// Publicly reachable base URL for hub callbacks (e.g. "https://reader.example.com").
    ///
    /// Hubs must be able to route to this address; empty means push stays off.
    #[serde(default)]
    pub public_base_url: String,
    /// Whether this deployment is production.
    ///
    /// In production the public base URL must be HTTPS.
    #[serde(default)]
    pub production: bool,
    /// Hours before lease expiry at which subscriptions are renewed.
    #[serde(default = "default_renew_window")]
    pub renew_window_hours: i64,
    /// Seconds between renewal sweeps.
    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: i64,
}

fn default_websub_enabled() -> bool {
    true
}

fn default_renew_window() -> i64 {
    24
}

fn default_renew_interval() -> i64 {
    3600
}

impl Default for WebSubConfig {
    fn default() -> Self {
        Self {
            enabled: default_websub_enabled(),
            public_base_url: String::new(),
            production: false,
            renew_window_hours: default_renew_window(),
            renew_interval_secs: default_renew_interval(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Callback listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// WebSub configuration.
    #[serde(default)]
    pub websub: WebSubConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedPulseError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedPulseError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDPULSE_PUBLIC_BASE_URL`: Override the WebSub callback base URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("FEEDPULSE_PUBLIC_BASE_URL") {
            if !base_url.is_empty() {
                self.websub.public_base_url = base_url;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_count == 0 {
            return Err(FeedPulseError::Validation(
                "scheduler.worker_count must be at least 1".to_string(),
            ));
        }
        if self.scheduler.claim_stale_secs <= 0 {
            return Err(FeedPulseError::Validation(
                "scheduler.claim_stale_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8723);

        assert_eq!(config.database.path, "data/feedpulse.db");

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/feedpulse.log");

        assert_eq!(config.scheduler.worker_count, 2);
        assert_eq!(config.scheduler.poll_interval_secs, 15);
        assert_eq!(config.scheduler.claim_stale_secs, 300);

        assert!(config.websub.enabled);
        assert!(config.websub.public_base_url.is_empty());
        assert!(!config.websub.production);
        assert_eq!(config.websub.renew_window_hours, 24);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[database]
path = "/var/lib/feedpulse/db.sqlite"

[websub]
public_base_url = "https://reader.example.com"
production = true
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.database.path, "/var/lib/feedpulse/db.sqlite");
        assert_eq!(config.websub.public_base_url, "https://reader.example.com");
        assert!(config.websub.production);
        // Untouched sections keep defaults
        assert_eq!(config.server.port, 8723);
        assert_eq!(config.scheduler.claim_stale_secs, 300);
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(Config::parse("this is not toml [").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.scheduler.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(Config::default().validate().is_ok());
    }
}
