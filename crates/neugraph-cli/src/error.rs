//! Error handling for the neugraph CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] neugraph_storage::StorageError),

    /// Viewer layer error
    #[error("Viewer error: {0}")]
    Widget(#[from] neugraph_widget::WidgetError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Serialization error: {0}")]
    Serde(#[from] toml::de::Error),

    /// JSON input could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bincode input could not be decoded
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Ad-hoc failure with context attached
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Missing required file or resource
    #[error("Missing resource: {0}")]
    MissingResource(String),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create a missing resource error
    pub fn missing_resource(msg: impl Into<String>) -> Self {
        Self::MissingResource(msg.into())
    }
}
