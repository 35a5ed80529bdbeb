//! Application configuration module
//!
//! Configuration is loaded from environment variables using the `config` and
//! `dotenvy` crates, with the `TURN_STATE` prefix and `__` separating nested
//! values. Every section has defaults, so an empty environment yields an
//! in-memory store with info-level logging.
//!
//! # Example
//!
//! ```no_run
//! use turn_state::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Storage backend: {:?}", config.storage.backend);
//! ```

mod error;
mod exchange;
mod redis;
mod retry;
mod storage;
mod telemetry;

pub use error::{ConfigError, ValidationError};
pub use exchange::ExchangeConfig;
pub use redis::RedisConfig;
pub use retry::RetryConfig;
pub use storage::{BackendKind, FileStorageConfig, StorageConfig};
pub use telemetry::TelemetryConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Backend selection and limits
    #[serde(default)]
    pub storage: StorageConfig,

    /// Backoff for read-modify-write loops
    #[serde(default)]
    pub retry: RetryConfig,

    /// Dedup marker retention
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Log level and format
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `TURN_STATE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `TURN_STATE__STORAGE__BACKEND=file` -> `storage.backend = file`
    /// - `TURN_STATE__STORAGE__FILE__ROOT=/var/lib/bot` -> `storage.file.root = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("TURN_STATE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.storage.validate()?;
        self.retry.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}
