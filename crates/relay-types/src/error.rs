//! Error types shared by the file-relay crates.

use thiserror::Error;

/// Error type for configuration and domain validation.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
