//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// How long to wait for a pooled connection
    pub database_acquire_timeout: Duration,

    /// Per-statement timeout applied inside every unit of work
    pub statement_timeout: Duration,

    /// Optional wall-clock bound on a whole unit of work
    pub unit_of_work_timeout: Option<Duration>,

    /// Interval between ledger reconciliation runs
    pub reconcile_interval: Duration,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10u32)?;
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"));
        }

        let database_acquire_timeout =
            Duration::from_secs(parse_env("DATABASE_ACQUIRE_TIMEOUT_SECS", 5u64)?);

        let statement_timeout = Duration::from_millis(parse_env("STATEMENT_TIMEOUT_MS", 5000u64)?);

        let unit_of_work_timeout = match env::var("UNIT_OF_WORK_TIMEOUT_MS") {
            Ok(raw) => Some(Duration::from_millis(
                raw.parse()
                    .map_err(|_| ConfigError::InvalidValue("UNIT_OF_WORK_TIMEOUT_MS"))?,
            )),
            Err(_) => None,
        };

        let reconcile_interval =
            Duration::from_secs(parse_env("RECONCILE_INTERVAL_SECS", 300u64)?);

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout,
            statement_timeout,
            unit_of_work_timeout,
            reconcile_interval,
            environment,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
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
