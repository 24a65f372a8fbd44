//! Error types for endpoint operations.

use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by protocol endpoints.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The record declares a transport no endpoint implements.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Could not reach or open a session with the server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A remote operation failed.
    #[error("{operation} failed for {path}: {message}")]
    Protocol {
        operation: &'static str,
        path: String,
        message: String,
    },

    /// The remote path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The connection stalled for longer than the inactivity bound.
    #[error("{operation} stalled for {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// IO error on the local side.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking transport task panicked or was cancelled.
    #[error("Transport task failed: {0}")]
    Task(String),

    /// The stored secret could not be turned into a usable one.
    #[error("Secret error: {0}")]
    Secret(String),
}

impl EndpointError {
    /// Create a connection error.
    pub fn connection(host: &str, err: impl std::fmt::Display) -> Self {
        Self::Connection(format!("{}: {}", host, err))
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a protocol error for `operation` on `path`.
    pub fn protocol(
        operation: &'static str,
        path: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Protocol {
            operation,
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Map an IO error from a socket with read/write timeouts, turning an
    /// expired timeout into [`EndpointError::Timeout`].
    pub fn io(operation: &'static str, timeout: Duration, err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout {
                operation,
                secs: timeout.as_secs(),
            },
            _ => Self::Io(err),
        }
    }
}

impl From<tokio::task::JoinError> for EndpointError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = EndpointError::protocol("upload", "/in/a.csv", "550 permission denied");
        assert_eq!(
            err.to_string(),
            "upload failed for /in/a.csv: 550 permission denied"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = EndpointError::Timeout {
            operation: "download",
            secs: 30,
        };
        assert_eq!(err.to_string(), "download stalled for 30s");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let stalled = std::io::Error::new(ErrorKind::TimedOut, "read timed out");
        let err = EndpointError::io("download", Duration::from_secs(45), stalled);
        assert!(matches!(
            err,
            EndpointError::Timeout {
                operation: "download",
                secs: 45
            }
        ));

        let denied = std::io::Error::new(ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            EndpointError::io("download", Duration::from_secs(45), denied),
            EndpointError::Io(_)
        ));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EndpointError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }
}
