//! Structured logging with tracing
//!
//! Installs a global `tracing-subscriber` fmt subscriber. `RUST_LOG`
//! overrides the configured level when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::TelemetryConfig;

/// Errors that can occur while installing the subscriber
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Initialize logging with the provided configuration
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    // Layer types differ, so each format gets its own branch
    let registry = Registry::default().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(level = %config.log_level, json = config.json, "logging initialized");
    Ok(())
}
