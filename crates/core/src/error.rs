//! Unified error types for harvester.
//!
//! Each variant carries a stable code prefix so log lines and tool errors
//! can be matched without parsing the message body.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the harvester crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty key).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No cached entry and no upstream value for the given key.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A cached blob could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The upstream source failed after the transport gave up.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),

    /// The source has no way to produce the requested data.
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),

    /// The operation was cancelled by its caller.
    #[error("CANCELLED")]
    Cancelled,
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::NotFound(msg) => (-32001, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::Serialization(e) => (-32002, e.to_string()),
            Error::Upstream(msg) => (-32008, msg.clone()),
            Error::Unsupported(msg) => (-32013, msg.clone()),
            Error::Cancelled => (-32014, "operation cancelled".to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
