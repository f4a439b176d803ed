//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid key or component config: {0}")]
    Core(#[from] mdrelay_core::CoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdrelay_telemetry::TelemetryError),

    #[error("Pull feed error: {0}")]
    Pull(#[from] mdrelay_pull::PullError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
