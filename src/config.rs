//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::{PgBrokerConfig, RedeliveryPolicy};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Ledger service port
    pub port: u16,

    /// Analytics service port
    pub analytics_port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    /// Default deadline of a ledger operation
    pub request_timeout: Duration,

    /// Channel carrying transaction events
    pub broker_channel: String,

    /// Ordering lanes per channel
    pub broker_lanes: u32,

    pub broker_poll_interval: Duration,

    /// Lease held by a receiver before the message can be reclaimed
    pub broker_lease: Duration,

    /// Deliveries before dead-lettering; 0 means unbounded
    pub broker_max_deliveries: u32,

    /// How long settled broker messages are kept
    pub broker_retention: Duration,

    /// Concurrent consume loops in the analytics process
    pub analytics_workers: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let config = Self {
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            analytics_port: parse_or(&lookup, "ANALYTICS_PORT", 8083)?,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            log_format,
            request_timeout: Duration::from_millis(parse_or(&lookup, "REQUEST_TIMEOUT_MS", 5000)?),
            broker_channel: lookup("BROKER_CHANNEL").unwrap_or_else(|| "transactions".to_string()),
            broker_lanes: parse_or(&lookup, "BROKER_LANES", 16)?,
            broker_poll_interval: Duration::from_millis(parse_or(&lookup, "BROKER_POLL_INTERVAL_MS", 200)?),
            broker_lease: Duration::from_secs(parse_or(&lookup, "BROKER_LEASE_SECS", 30)?),
            broker_max_deliveries: parse_or(&lookup, "BROKER_MAX_DELIVERIES", 5)?,
            broker_retention: Duration::from_secs(parse_or::<u64, _>(&lookup, "BROKER_RETENTION_HOURS", 24)? * 3600),
            analytics_workers: parse_or(&lookup, "ANALYTICS_WORKERS", 4)?,
        };

        if config.broker_lanes == 0 {
            return Err(ConfigError::InvalidValue("BROKER_LANES"));
        }
        if config.broker_lease.is_zero() {
            return Err(ConfigError::InvalidValue("BROKER_LEASE_SECS"));
        }
        if config.broker_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("BROKER_POLL_INTERVAL_MS"));
        }
        if config.analytics_workers == 0 {
            return Err(ConfigError::InvalidValue("ANALYTICS_WORKERS"));
        }

        Ok(config)
    }

    pub fn broker_config(&self) -> PgBrokerConfig {
        PgBrokerConfig {
            lanes: self.broker_lanes,
            poll_interval: self.broker_poll_interval,
            lease: self.broker_lease,
        }
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy::from_max_deliveries(self.broker_max_deliveries)
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
