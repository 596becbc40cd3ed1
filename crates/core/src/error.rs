//! Core error types

use thiserror::Error;

/// Core error type for PASER
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
