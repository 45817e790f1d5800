//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid socket address: {0}")]
    InvalidSocketAddr(String),

    #[error("Lock time must be at least one second")]
    InvalidLockTime,

    #[error("Duration must be positive: {0}")]
    InvalidDuration(&'static str),

    #[error("Retry batch size must be positive")]
    InvalidBatchSize,

    #[error("Retry ceiling must be positive")]
    InvalidRetryCeiling,

    #[error("{field} exceeds the maximum of {max}")]
    OutOfRange { field: &'static str, max: u64 },
}
