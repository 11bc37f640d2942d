//! Server configuration loaded from environment variables.

use std::time::Duration;

use domain::AggregateConfig;

/// Server configuration with defaults for local runs.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `0.0.0.0`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used
///   when unset
/// - `READ_BATCH_SIZE`: events per hydration read (default `1000`)
/// - `COMMAND_TIMEOUT_MS`: bound on open and execute calls (default `5000`)
/// - `AGGREGATE_IDLE_TIMEOUT_SECS`: stop idle aggregates after this long
///   (default: never)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub read_batch_size: usize,
    pub command_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|value| value.parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            read_batch_size: lookup("READ_BATCH_SIZE")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.read_batch_size),
            command_timeout: parsed("COMMAND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            idle_timeout: parsed("AGGREGATE_IDLE_TIMEOUT_SECS").map(Duration::from_secs),
        }
    }

    /// Returns the `host:port` bind address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Aggregate settings derived from this configuration.
    pub fn aggregate_config(&self) -> AggregateConfig {
        AggregateConfig {
            read_batch_size: self.read_batch_size,
            command_timeout: self.command_timeout,
            idle_timeout: self.idle_timeout,
            ..AggregateConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let aggregates = AggregateConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            read_batch_size: aggregates.read_batch_size,
            command_timeout: aggregates.command_timeout,
            idle_timeout: aggregates.idle_timeout,
        }
    }
}
