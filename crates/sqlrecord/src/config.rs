//! Database configuration.
//!
//! A [`DatabaseConfig`] can be written by hand, deserialized from JSON, or
//! parsed from a URL such as
//! `sqlite://db/app.sqlite3?pool=10&checkout_timeout=2.5`.
//!
//! Durations are given in seconds. A reaping frequency or idle timeout of
//! zero (or absent) turns the reaper or idle flushing off.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlrecord_core::{Error, Result};
use sqlrecord_pool::{MAX_DURATION, PoolConfig};
use sqlrecord_session::HandleConfig;
use sqlrecord_sqlite::SqliteConfig;
use std::path::Path;
use std::time::Duration;

/// The adapter every config resolves to today.
pub const SQLITE_ADAPTER: &str = "sqlite";

const URL_PATTERN: &str = r"^(?P<adapter>[a-z][a-z0-9+.-]*)://(?P<database>[^?]*)(?:\?(?P<query>.*))?$";

/// Settings for a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub adapter: String,
    /// File path, or `:memory:`.
    pub database: String,
    /// Maximum number of pooled connections.
    pub pool: usize,
    pub checkout_timeout: f64,
    pub reaping_frequency: Option<f64>,
    pub idle_timeout: Option<f64>,
    pub query_cache: bool,
    pub dynamic_includes: bool,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            adapter: SQLITE_ADAPTER.to_string(),
            database: ":memory:".to_string(),
            pool: 5,
            checkout_timeout: 5.0,
            reaping_frequency: Some(60.0),
            idle_timeout: Some(300.0),
            query_cache: true,
            dynamic_includes: true,
            busy_timeout: 5000,
        }
    }
}

impl DatabaseConfig {
    /// A SQLite config for `database` with default pool settings.
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_pool(mut self, size: usize) -> Self {
        self.pool = size;
        self
    }

    pub fn with_checkout_timeout(mut self, seconds: f64) -> Self {
        self.checkout_timeout = seconds;
        self
    }

    pub fn with_reaping_frequency(mut self, seconds: Option<f64>) -> Self {
        self.reaping_frequency = seconds;
        self
    }

    pub fn with_idle_timeout(mut self, seconds: Option<f64>) -> Self {
        self.idle_timeout = seconds;
        self
    }

    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.query_cache = enabled;
        self
    }

    pub fn with_dynamic_includes(mut self, enabled: bool) -> Self {
        self.dynamic_includes = enabled;
        self
    }

    /// Parse a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid database config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse `adapter://database?key=value&...`.
    ///
    /// Recognized keys are the config's field names except `adapter` and
    /// `database`. An empty database means `:memory:`.
    pub fn from_url(url: &str) -> Result<Self> {
        let pattern =
            Regex::new(URL_PATTERN).map_err(|e| Error::config(format!("bad URL pattern: {e}")))?;
        let captures = pattern
            .captures(url.trim())
            .ok_or_else(|| Error::config(format!("malformed database URL: {url:?}")))?;

        let mut config = Self {
            adapter: captures["adapter"].to_string(),
            ..Self::default()
        };
        let database = &captures["database"];
        if !database.is_empty() {
            config.database = database.to_string();
        }
        if let Some(query) = captures.name("query") {
            for pair in query.as_str().split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                config.apply_option(key, value)?;
            }
        }
        config.validate()?;
        tracing::debug!(
            adapter = %config.adapter,
            database = %config.database,
            pool = config.pool,
            "Parsed database URL"
        );
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "pool" => self.pool = parse(key, value)?,
            "checkout_timeout" => self.checkout_timeout = parse(key, value)?,
            "reaping_frequency" => self.reaping_frequency = Some(parse(key, value)?),
            "idle_timeout" => self.idle_timeout = Some(parse(key, value)?),
            "query_cache" => self.query_cache = parse_bool(key, value)?,
            "dynamic_includes" => self.dynamic_includes = parse_bool(key, value)?,
            "busy_timeout" => self.busy_timeout = parse(key, value)?,
            _ => return Err(Error::config(format!("unknown database option {key:?}"))),
        }
        Ok(())
    }

    /// Reject settings no pool or driver can honor.
    pub fn validate(&self) -> Result<()> {
        if self.adapter != SQLITE_ADAPTER {
            return Err(Error::config(format!(
                "unsupported adapter {:?}; only {SQLITE_ADAPTER:?} has a driver",
                self.adapter
            )));
        }
        if self.pool == 0 {
            return Err(Error::config("pool size must be at least 1"));
        }
        let seconds = [
            ("checkout_timeout", Some(self.checkout_timeout)),
            ("reaping_frequency", self.reaping_frequency),
            ("idle_timeout", self.idle_timeout),
        ];
        for (name, value) in seconds {
            if let Some(value) = value {
                let in_range = Duration::try_from_secs_f64(value).is_ok_and(|d| d <= MAX_DURATION);
                if !in_range {
                    return Err(Error::config(format!(
                        "{name} must be between 0 and {} seconds, got {value}",
                        MAX_DURATION.as_secs()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pool settings. Out-of-range durations are clamped; `validate`
    /// reports them.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.pool)
            .checkout_timeout(seconds(self.checkout_timeout))
            .reaping_frequency(positive_seconds(self.reaping_frequency))
            .idle_timeout(positive_seconds(self.idle_timeout))
    }

    pub fn handle_config(&self) -> HandleConfig {
        HandleConfig::new()
            .query_cache(self.query_cache)
            .dynamic_includes(self.dynamic_includes)
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig::file(self.database.as_str()).busy_timeout(self.busy_timeout)
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).map_or(MAX_DURATION, |d| d.min(MAX_DURATION))
}

fn positive_seconds(value: Option<f64>) -> Option<Duration> {
    value.filter(|s| *s > 0.0).map(seconds)
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("invalid value {value:?} for {key}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" | "" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::config(format!("invalid value {value:?} for {key}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.adapter, "sqlite");
        assert_eq!(config.database, ":memory:");
        assert_eq!(config.pool, 5);
        assert!(config.query_cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_url() {
        let config = DatabaseConfig::from_url(
            "sqlite://db/app.sqlite3?pool=10&checkout_timeout=2.5&query_cache=false",
        )
        .unwrap();
        assert_eq!(config.database, "db/app.sqlite3");
        assert_eq!(config.pool, 10);
        assert!((config.checkout_timeout - 2.5).abs() < f64::EPSILON);
        assert!(!config.query_cache);
        assert!(config.dynamic_includes);
    }

    #[test]
    fn test_from_url_memory_and_absolute_paths() {
        assert_eq!(DatabaseConfig::from_url("sqlite://").unwrap().database, ":memory:");
        assert_eq!(
            DatabaseConfig::from_url("sqlite:///var/data/app.db").unwrap().database,
            "/var/data/app.db"
        );
    }

    #[test]
    fn test_from_url_rejects_bad_input() {
        assert!(DatabaseConfig::from_url("not a url").is_err());
        assert!(DatabaseConfig::from_url("postgres://localhost/app").is_err());
        assert!(DatabaseConfig::from_url("sqlite://app.db?pool=lots").is_err());
        assert!(DatabaseConfig::from_url("sqlite://app.db?pool=0").is_err());
        assert!(DatabaseConfig::from_url("sqlite://app.db?colour=blue").is_err());
        assert!(DatabaseConfig::from_url("sqlite://app.db?checkout_timeout=-1").is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = DatabaseConfig::from_json(r#"{"database": "app.db", "pool": 2}"#).unwrap();
        assert_eq!(config.database, "app.db");
        assert_eq!(config.pool, 2);
        assert_eq!(config.reaping_frequency, Some(60.0));

        assert!(DatabaseConfig::from_json(r#"{"pool": "two"}"#).is_err());
        assert!(DatabaseConfig::from_json(r#"{"poool": 2}"#).is_err());
    }

    #[test]
    fn test_zero_disables_reaper_and_idle_flush() {
        let config = DatabaseConfig::from_url("sqlite://?reaping_frequency=0&idle_timeout=0").unwrap();
        let pool = config.pool_config();
        assert_eq!(pool.reaping_frequency, None);
        assert_eq!(pool.idle_timeout, None);
        assert_eq!(pool.size, 5);
        assert_eq!(pool.checkout_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        assert!(DatabaseConfig::from_url("sqlite://?checkout_timeout=1e30").is_err());
        assert!(DatabaseConfig::from_url("sqlite://?idle_timeout=1e300").is_err());
        assert!(DatabaseConfig::from_json(r#"{"reaping_frequency": 1e20}"#).is_err());

        let config = DatabaseConfig::default().with_checkout_timeout(1e30);
        assert!(config.validate().is_err());
        assert_eq!(config.pool_config().checkout_timeout, MAX_DURATION);
    }

    #[test]
    fn test_derived_configs() {
        let config = DatabaseConfig::sqlite("app.db")
            .with_dynamic_includes(false)
            .with_pool(3);
        assert!(!config.handle_config().dynamic_includes);
        assert_eq!(config.sqlite_config().path, "app.db");
        assert_eq!(config.pool_config().size, 3);
    }
}
