//! Configuration management
//!
//! Everything is read from the process environment (after loading `.env` via
//! dotenvy). The store URL and endpoint count are required; the rest falls
//! back to the `DEFAULT_*` constants below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointOptions;
use crate::error::{CollectorError, CollectorResult};
use crate::worker::ReceivePolicy;

// ============================================================================
// Configuration Constants
// ============================================================================

/// First port of the sequential endpoint range.
pub const DEFAULT_BASE_PORT: u16 = 5556;

/// Transport base address used when `ZMQ_ENDPOINT` is unset.
pub const DEFAULT_BASE_ADDRESS: &str = "tcp://127.0.0.1";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bound on one endpoint connection attempt, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Silence after which an endpoint rebuilds its connection, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Consecutive receive failures a worker tolerates before giving up.
pub const DEFAULT_RECEIVE_MAX_FAILURES: u32 = 10;

/// Delay before the first receive retry, in milliseconds.
pub const DEFAULT_RECEIVE_BACKOFF_MS: u64 = 100;

/// Upper bound on the receive retry delay, in milliseconds.
pub const DEFAULT_RECEIVE_BACKOFF_MAX_MS: u64 = 5_000;

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub transport: TransportConfig,
    pub receive: ReceiveConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Endpoint pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Scheme and host without a port, e.g. `tcp://10.0.0.5`
    pub base_address: String,
    pub base_port: u16,
    /// Number of endpoints, and therefore workers
    pub endpoints: usize,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl TransportConfig {
    pub fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }
}

/// Receive retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveConfig {
    pub max_failures: u32,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
}

impl ReceiveConfig {
    pub fn policy(&self) -> ReceivePolicy {
        ReceivePolicy {
            max_failures: self.max_failures,
            initial_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_RECEIVE_MAX_FAILURES,
            backoff_ms: DEFAULT_RECEIVE_BACKOFF_MS,
            backoff_max_ms: DEFAULT_RECEIVE_BACKOFF_MAX_MS,
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> CollectorResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> CollectorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("POSTGRES_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or_else(|| CollectorError::config("POSTGRES_URL is not set"))?;

        let endpoints = lookup("NUM_OF_ENDPOINTS")
            .ok_or_else(|| CollectorError::config("NUM_OF_ENDPOINTS is not set"))?;
        let endpoints = parse_var("NUM_OF_ENDPOINTS", &endpoints)?;

        let base_address = normalize_base_address(
            &lookup("ZMQ_ENDPOINT").unwrap_or_else(|| DEFAULT_BASE_ADDRESS.to_string()),
        );

        let config = Config {
            database: DatabaseConfig {
                url,
                max_connections: optional_var(&lookup, "DB_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: optional_var(&lookup, "DB_MIN_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: optional_var(&lookup, "DB_CONNECT_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            transport: TransportConfig {
                base_address,
                base_port: optional_var(&lookup, "ZMQ_BASE_PORT")?.unwrap_or(DEFAULT_BASE_PORT),
                endpoints,
                connect_timeout_ms: optional_var(&lookup, "ZMQ_CONNECT_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                idle_timeout_ms: optional_var(&lookup, "ZMQ_IDLE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS),
            },
            receive: ReceiveConfig {
                max_failures: optional_var(&lookup, "RECEIVE_MAX_FAILURES")?
                    .unwrap_or(DEFAULT_RECEIVE_MAX_FAILURES),
                backoff_ms: optional_var(&lookup, "RECEIVE_BACKOFF_MS")?
                    .unwrap_or(DEFAULT_RECEIVE_BACKOFF_MS),
                backoff_max_ms: optional_var(&lookup, "RECEIVE_BACKOFF_MAX_MS")?
                    .unwrap_or(DEFAULT_RECEIVE_BACKOFF_MAX_MS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> CollectorResult<()> {
        if self.database.url.is_empty() {
            return Err(CollectorError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(CollectorError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(CollectorError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.transport.endpoints == 0 {
            return Err(CollectorError::config(
                "NUM_OF_ENDPOINTS must be a positive integer",
            ));
        }

        let last_offset = u16::try_from(self.transport.endpoints - 1).ok();
        if last_offset
            .and_then(|offset| self.transport.base_port.checked_add(offset))
            .is_none()
        {
            return Err(CollectorError::config(format!(
                "{} endpoints starting at port {} exceed the port range",
                self.transport.endpoints, self.transport.base_port
            )));
        }

        if self.transport.connect_timeout_ms == 0 || self.transport.idle_timeout_ms == 0 {
            return Err(CollectorError::config(
                "ZMQ_CONNECT_TIMEOUT_MS and ZMQ_IDLE_TIMEOUT_MS must be greater than 0",
            ));
        }

        if self.receive.max_failures == 0 {
            return Err(CollectorError::config(
                "RECEIVE_MAX_FAILURES must be greater than 0",
            ));
        }

        if self.receive.backoff_ms > self.receive.backoff_max_ms {
            return Err(CollectorError::config(format!(
                "RECEIVE_BACKOFF_MS ({}) cannot be greater than RECEIVE_BACKOFF_MAX_MS ({})",
                self.receive.backoff_ms, self.receive.backoff_max_ms
            )));
        }

        Ok(())
    }
}

fn parse_var<T>(key: &str, raw: &str) -> CollectorResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CollectorError::config(format!("{} has invalid value '{}': {}", key, raw, e)))
}

fn optional_var<T, F>(lookup: &F, key: &str) -> CollectorResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map(|raw| parse_var(key, &raw)).transpose()
}

/// `10.0.0.5` -> `tcp://10.0.0.5`; a trailing slash is dropped.
fn normalize_base_address(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("tcp://{}", trimmed)
    }
}
