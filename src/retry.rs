//! Retry with exponential backoff, jitter and per-call timeouts
//!
//! Every external call the pipeline makes goes through [`retry`]: each
//! attempt is bounded by a timeout, and only errors that classify as
//! transient are retried.

use crate::error::{Classify, EmbeddingServiceError, RepositoryError, VectorStoreError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff parameters for one external port
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random spread applied to each delay, as a fraction of it
    pub jitter: f64,
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retrying after the given failed attempt (1-based).
    /// Doubles per attempt, capped at `max_delay`, then spread by `±jitter`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let delay = delay.min(self.max_delay.as_secs_f64());

        let spread = delay * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            (rand::random::<f64>() - 0.5) * 2.0 * spread
        } else {
            0.0
        };

        Duration::from_secs_f64((delay + offset).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::config::RetryConfig::default().policy()
    }
}

/// Port errors that can represent an elapsed call timeout
pub trait TimeoutError {
    fn timed_out(after: Duration) -> Self;
}

impl TimeoutError for RepositoryError {
    fn timed_out(after: Duration) -> Self {
        RepositoryError::Timeout(after.as_secs())
    }
}

impl TimeoutError for EmbeddingServiceError {
    fn timed_out(after: Duration) -> Self {
        EmbeddingServiceError::Timeout(after.as_secs())
    }
}

impl TimeoutError for VectorStoreError {
    fn timed_out(after: Duration) -> Self {
        VectorStoreError::Timeout(after.as_secs())
    }
}

/// Why [`retry`] gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure<E> {
    /// Cancellation was requested before the call succeeded
    Cancelled,
    /// A permanent error, or the last transient error once attempts ran out
    Exhausted { error: E, attempts: u32 },
}

/// Run `call` until it succeeds, fails permanently, runs out of attempts or
/// is cancelled. Each attempt is bounded by `timeout`; an elapsed timeout
/// counts as a transient failure.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<T, RetryFailure<E>>
where
    E: Classify + TimeoutError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            result = tokio::time::timeout(timeout, call()) => result,
        };

        let error = match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => E::timed_out(timeout),
        };

        if !error.is_transient() || attempt >= max_attempts {
            if error.is_transient() {
                tracing::warn!(
                    "{} failed after {} attempt(s): {}",
                    operation,
                    attempt,
                    error
                );
            }
            return Err(RetryFailure::Exhausted {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            "{} attempt {}/{} failed: {}; retrying in {:?}",
            operation,
            attempt,
            max_attempts,
            error,
            delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
