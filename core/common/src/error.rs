//! Common error types for unipath.

use std::io;
use thiserror::Error;

/// Top-level error type for path and accessor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Path or object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Destination already exists and overwriting was not requested.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backend refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend could not be reached or the accessor could not be built.
    #[error("Backend unavailable [{scheme}]: {reason}")]
    BackendUnavailable { scheme: String, reason: String },

    /// I/O was requested for a path flavor the host cannot serve.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Invalid argument combination or malformed input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Settings could not be resolved.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The bounded worker queue rejected a submission.
    #[error("Worker pool saturated: {0}")]
    Saturated(String),

    /// A cross-scheme move copied the data but could not remove the source.
    #[error("Moved {origin} to {destination} but the source remains: {reason}")]
    DanglingSource {
        origin: String,
        destination: String,
        reason: String,
    },

    /// Unclassified I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invariant violation inside the library (lost worker, poisoned lock).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify an I/O error, keeping `context` (usually the path) in the message.
    pub fn from_io(err: io::Error, context: impl std::fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(context.to_string()),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(context.to_string()),
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("{}: {}", context, err))
            }
            _ => Error::Io(io::Error::new(err.kind(), format!("{}: {}", context, err))),
        }
    }

    /// Build a `BackendUnavailable` error for `scheme`.
    pub fn backend(scheme: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::BackendUnavailable {
            scheme: scheme.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. } | Error::Saturated(_))
    }

    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let err = Error::from_io(io::Error::from(io::ErrorKind::NotFound), "/tmp/x");
        assert!(matches!(err, Error::NotFound(ref p) if p == "/tmp/x"));

        let err = Error::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/root");
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err = Error::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/a");
        assert!(matches!(err, Error::AlreadyExists(_)));

        let err = Error::from_io(io::Error::from(io::ErrorKind::BrokenPipe), "/a");
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::backend("s3", "timeout").is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
        assert!(!Error::PermissionDenied("x".into()).is_transient());
    }

    #[test]
    fn test_backend_message_names_scheme() {
        let msg = Error::backend("r2", "connection refused").to_string();
        assert!(msg.contains("r2"));
        assert!(msg.contains("connection refused"));
    }
}
