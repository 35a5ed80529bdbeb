use std::process::ExitCode;

use turn_state::adapters::storage;
use turn_state::config::{AppConfig, ConfigError};
use turn_state::ports::StorageError;
use turn_state::probe::{self, ProbeError};
use turn_state::telemetry::{self, TelemetryError};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    config.validate().map_err(ConfigError::from)?;
    telemetry::init(&config.telemetry)?;

    let storage = storage::connect(&config.storage).await?;
    let report = probe::run(storage.as_ref()).await?;

    tracing::info!(
        backend = storage.backend_name(),
        created = %report.created,
        updated = %report.updated,
        "storage probe passed"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "storage probe failed");
            eprintln!("turn-state: {}", err);
            ExitCode::FAILURE
        }
    }
}
