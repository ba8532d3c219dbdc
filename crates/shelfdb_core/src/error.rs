//! Error types for the coordinator.

use shelfdb_engine::EngineError;
use thiserror::Error;

/// Result type for shelf operations.
pub type ShelfResult<T> = Result<T, ShelfError>;

/// Errors surfaced by shelf operations.
///
/// Transient engine failures (connection churn, momentarily missing tables)
/// are absorbed by the retry policy and reach callers only inside
/// [`ShelfError::RetryExhausted`].
#[derive(Debug, Error)]
pub enum ShelfError {
    /// A whole-database drop was requested while a schema upgrade was in
    /// flight. Fatal to that call only; the upgrade proceeds untouched.
    #[error("schema conflict: cannot drop database {database} while an open is in flight")]
    SchemaConflict {
        /// The database whose drop was rejected.
        database: String,
    },

    /// A non-transient engine failure, surfaced verbatim. Never retried.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The operation kept failing transiently until the attempt ceiling.
    #[error("operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last transient failure observed.
        #[source]
        last: EngineError,
    },
}

impl ShelfError {
    /// Creates a schema conflict error.
    pub fn schema_conflict(database: impl Into<String>) -> Self {
        Self::SchemaConflict {
            database: database.into(),
        }
    }

    /// Returns true if this is a schema conflict.
    pub fn is_schema_conflict(&self) -> bool {
        matches!(self, ShelfError::SchemaConflict { .. })
    }

    /// Returns true if the retry ceiling was exhausted.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ShelfError::RetryExhausted { .. })
    }
}
