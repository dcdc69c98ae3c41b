//! Server and database configuration from the environment.

use std::time::Duration;

use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn optional_num<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_num(name, value),
        Err(_) => Ok(default),
    }
}

/// Runtime settings for the chat server itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Number of worker tasks handling requests.
    pub worker_count: usize,
    /// Granularity at which long-lived loops re-check for shutdown.
    pub poll_timeout: Duration,
    pub max_read_buffer: usize,
    pub max_write_buffer: usize,
    pub token_expire: Duration,
    /// Interval between expired-token sweeps.
    pub cleanup_interval: Duration,
}

impl ServerConfig {
    /// Read the server configuration from the environment.
    ///
    /// `SERVER_PORT` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_num("SERVER_PORT", required("SERVER_PORT")?)?;
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Ok(Self {
            port,
            worker_count: optional_num("THREAD_POOL_SIZE", default_workers)?,
            poll_timeout: Duration::from_millis(optional_num("EPOLL_TIMEOUT_MS", 1000u64)?),
            max_read_buffer: optional_num("MAX_READ_BUFFER_SIZE", 1024 * 1024)?,
            max_write_buffer: optional_num("MAX_WRITE_BUFFER_SIZE", 1024 * 1024)?,
            token_expire: Duration::from_secs(optional_num("TOKEN_EXPIRE_MINUTES", 30u64)? * 60),
            cleanup_interval: Duration::from_secs(
                optional_num("CLEANUP_INTERVAL_MINUTES", 10u64)? * 60,
            ),
        })
    }
}

/// Connection settings for the MySQL pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub pool_min: usize,
    pub pool_max: usize,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are evicted by the health check.
    pub idle_timeout: Duration,
}

impl DbConfig {
    /// Read the database configuration from the environment.
    ///
    /// All variables are required except `DB_PORT` (3306). Timeouts are
    /// given in seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: required("DB_HOST")?,
            port: optional_num("DB_PORT", 3306)?,
            username: required("DB_USERNAME")?,
            password: required("DB_PASSWORD")?,
            database: required("DB_DATABASE")?,
            pool_min: parse_num("DB_POOL_MIN", required("DB_POOL_MIN")?)?,
            pool_max: parse_num("DB_POOL_MAX", required("DB_POOL_MAX")?)?,
            acquire_timeout: Duration::from_secs(parse_num(
                "DB_CONN_TIMEOUT",
                required("DB_CONN_TIMEOUT")?,
            )?),
            idle_timeout: Duration::from_secs(parse_num(
                "DB_IDLE_TIMEOUT",
                required("DB_IDLE_TIMEOUT")?,
            )?),
        })
    }
}
