//! Capped exponential backoff for scheduler and store queries.
//!
//! Only [`DomainError::TransientInfra`] is retried. Permission errors and
//! every other kind are returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::RetryConfig;

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            max_elapsed,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            Duration::from_millis(config.max_elapsed_ms),
        )
    }

    /// Retry policy that gives up after the first transient failure.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Run `operation` until it succeeds, fails permanently, or the elapsed
    /// time budget is spent.
    pub async fn execute<F, Fut, T>(&self, what: &str, mut operation: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        backoff::future::retry_notify(
            policy,
            || {
                let fut = operation();
                async move {
                    fut.await.map_err(|e| {
                        if e.is_transient() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |err: DomainError, delay: Duration| {
                warn!(operation = what, error = %err, delay_ms = delay.as_millis() as u64, "Transient failure, retrying");
            },
        )
        .await
    }
}
