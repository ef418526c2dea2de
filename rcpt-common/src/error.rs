//! Common error types for RCPT

use thiserror::Error;

/// Common result type for RCPT operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared config and event code
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Value outside the accepted set (e.g. an unknown status string)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Background task failure
    #[error("Internal error: {0}")]
    Internal(String),
}
