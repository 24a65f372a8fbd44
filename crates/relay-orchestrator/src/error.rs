//! Error types for transfer execution.

use thiserror::Error;

use relay_endpoints::EndpointError;
use relay_storage::StorageError;

/// Errors raised while running or managing transfers.
///
/// Inside a run every variant except `TransferFailed` is fatal and ends the
/// execution as `Error`; `TransferFailed` is recorded against one file only.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A task references an endpoint record that does not exist
    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    /// An endpoint record declares a transport nothing implements
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// One file could not be moved
    #[error("Transfer failed for {path}: {reason}")]
    TransferFailed { path: String, reason: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Listing, connection or cleanup failure outside a single file
    #[error("Endpoint error: {0}")]
    Endpoint(EndpointError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local staging failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run panicked; the message is the panic payload
    #[error("Execution panicked: {0}")]
    Panicked(String),
}

impl TransferError {
    /// Per-file failure for `path`.
    pub fn transfer_failed(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::TransferFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<EndpointError> for TransferError {
    fn from(err: EndpointError) -> Self {
        match err {
            EndpointError::UnsupportedTransport(kind) => TransferError::UnsupportedTransport(kind),
            other => TransferError::Endpoint(other),
        }
    }
}
