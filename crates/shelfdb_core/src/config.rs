//! Configuration for the coordinator.

/// Default retry ceiling for transient failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration shared by all shelves created from one [`Registry`].
///
/// [`Registry`]: crate::Registry
#[derive(Debug, Clone, Default)]
pub struct ShelfConfig {
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
}

impl ShelfConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for retry behavior.
///
/// Retries are bounded by an attempt ceiling only; there are no delays or
/// timeouts. An operation that fails transiently on its
/// `max_attempts`-th consecutive attempt surfaces
/// [`ShelfError::RetryExhausted`](crate::ShelfError::RetryExhausted).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per operation.
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt ceiling.
    ///
    /// A ceiling of zero is treated as one attempt.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a configuration that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
