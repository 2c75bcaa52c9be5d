//! Simulator error types

use thiserror::Error;
use uvc_format::FormatError;
use uvc_stream::UvcError;

#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configured capability set is malformed
    #[error("Invalid capability set: {0}")]
    Format(#[from] FormatError),

    /// Stream request failed
    #[error("Stream error: {0}")]
    Stream(#[from] UvcError),

    /// Logging could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Reply of an unexpected kind
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}
