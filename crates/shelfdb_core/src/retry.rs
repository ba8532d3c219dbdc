//! Failure classification and bounded retry.

use crate::config::RetryConfig;
use crate::error::ShelfError;
use shelfdb_engine::EngineError;

/// Classifies engine failures and bounds retries.
///
/// Only connection-closing and table-momentarily-missing failures are
/// retried; every other engine failure surfaces immediately. Retrying is a
/// bounded loop in [`OperationQueue::submit`](crate::queue::OperationQueue),
/// not recursion: classification ("is this retryable") is separate from the
/// retry mechanics.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub(crate) fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns true if the failure is caused by transient connection or
    /// schema churn.
    pub(crate) fn is_transient(&self, err: &EngineError) -> bool {
        err.is_transient()
    }

    /// Maximum attempts per operation.
    pub(crate) fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Builds the failure for an operation that hit the ceiling.
    pub(crate) fn exhausted(&self, attempts: u32, last: EngineError) -> ShelfError {
        ShelfError::RetryExhausted { attempts, last }
    }
}
