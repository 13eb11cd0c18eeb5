//! Error types for tagcache

use std::time::Duration;

/// Result type alias for tagcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for raw store commands
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store is not connected (or the connection was lost)
    #[error("store is not ready yet or connection is lost")]
    NotReady,

    /// A single store command exceeded its deadline
    #[error("{command} timed out after {after:?}")]
    Timeout {
        /// Store command that was aborted
        command: &'static str,
        /// Configured deadline
        after: Duration,
    },

    /// A store command failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An entry could not be serialized for writing
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by a [`KvStore`](crate::KvStore) implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend has no live connection
    #[error("store connection is not established")]
    Disconnected,

    /// The backend rejected or failed the command
    #[error("{command} failed: {message}")]
    Command {
        /// Command name, e.g. `HSCAN`
        command: &'static str,
        /// Backend error text
        message: String,
    },

    /// The backend returned a value of an unexpected shape
    #[error("{command} returned malformed data: {message}")]
    Malformed {
        /// Command name
        command: &'static str,
        /// What was wrong
        message: String,
    },
}

impl StoreError {
    /// Wrap a backend error for the given command
    pub fn command(command: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Command {
            command,
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Whether this failure is a connectivity failure the caller should route around
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady | Error::Store(StoreError::Disconnected))
    }
}
