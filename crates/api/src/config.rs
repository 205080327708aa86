//! Application configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;
use trading::DEFAULT_CREDIT_LIMIT_CENTS;

/// A configuration variable that is set but cannot be used.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected plain or json, got {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `plain` or `json` (default: `plain`)
/// - `DATABASE_URL` — Postgres URL; unset runs on the in-memory store
/// - `SUBSCRIPTION_GROUP` — consumer group of the dispatcher (default: `"trade-execution"`)
/// - `SUBSCRIPTION_MAX_RETRIES` — redeliveries before an event is parked (default: `10`)
/// - `SHUTDOWN_GRACE_SECS` — time the dispatcher gets to drain on shutdown (default: `10`)
/// - `DEFAULT_CREDIT_LIMIT` — credit line of new accounts, in cents (default: `1000000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub subscription_group: String,
    pub subscription_max_retries: u32,
    pub shutdown_grace: Duration,
    pub default_credit_limit_cents: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT")?.unwrap_or(defaults.port),
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            database_url: text("DATABASE_URL"),
            subscription_group: text("SUBSCRIPTION_GROUP").unwrap_or(defaults.subscription_group),
            subscription_max_retries: parsed(&lookup, "SUBSCRIPTION_MAX_RETRIES")?
                .unwrap_or(defaults.subscription_max_retries),
            shutdown_grace: parsed(&lookup, "SHUTDOWN_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            default_credit_limit_cents: parsed(&lookup, "DEFAULT_CREDIT_LIMIT")?
                .unwrap_or(defaults.default_credit_limit_cents),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            database_url: None,
            subscription_group: "trade-execution".to_string(),
            subscription_max_retries: 10,
            shutdown_grace: Duration::from_secs(10),
            default_credit_limit_cents: DEFAULT_CREDIT_LIMIT_CENTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Plain);
        assert_eq!(config.database_url, None);
        assert_eq!(config.subscription_group, "trade-execution");
        assert_eq!(config.subscription_max_retries, 10);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.default_credit_limit_cents, 1_000_000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/trading"),
            ("SUBSCRIPTION_GROUP", "replay"),
            ("SUBSCRIPTION_MAX_RETRIES", "3"),
            ("SHUTDOWN_GRACE_SECS", "2"),
            ("DEFAULT_CREDIT_LIMIT", "500"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/trading"));
        assert_eq!(config.subscription_group, "replay");
        assert_eq!(config.subscription_max_retries, 3);
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.default_credit_limit_cents, 500);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("DATABASE_URL", " "), ("PORT", "")]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_unparsable_value_is_reported() {
        let error = load(&[("PORT", "http")]).unwrap_err();
        assert_eq!(error.name, "PORT");
        assert_eq!(error.value, "http");

        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
