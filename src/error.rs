//! Error types for the Quotamock service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Quotamock operations.
#[derive(Error, Debug)]
pub enum QuotaMockError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate specification that does not parse
    #[error("Invalid rate specification: {0}")]
    InvalidRateSpec(String),

    /// Quota store failures
    #[error("Quota store error: {0}")]
    Store(#[from] StoreError),

    /// Data provider failures
    #[error("Data provider error: {0}")]
    Provider(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for QuotaMockError {
    fn from(err: config::ConfigError) -> Self {
        QuotaMockError::Config(err.to_string())
    }
}

/// Result type alias for Quotamock operations.
pub type Result<T> = std::result::Result<T, QuotaMockError>;
