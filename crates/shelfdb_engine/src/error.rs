//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The connection was closed (or is closing) underneath the caller,
    /// typically because a sibling handle reopened the database at a higher
    /// version. Expected to self-resolve once the churn completes.
    #[error("the database connection is closing")]
    ConnectionClosing,

    /// A requested table does not exist in the connection's schema.
    ///
    /// Transient from the coordinator's point of view: the table may be
    /// created by a pending version upgrade.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// An open was requested at a version below the one already on disk.
    #[error("requested version {requested} is below existing version {existing}")]
    VersionConflict {
        /// The version that was requested.
        requested: u64,
        /// The version that already exists.
        existing: u64,
    },

    /// A write was attempted inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Any other engine failure. Never retried.
    #[error("engine failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns true if this failure is caused by transient connection or
    /// schema churn and is expected to succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ConnectionClosing | EngineError::NoSuchTable(_)
        )
    }
}
