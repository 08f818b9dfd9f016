//! Conflict retry policy
//!
//! One configurable exponential-backoff policy shared by every
//! conflict-prone mutation (queue reorder, shuffle, append, removal and
//! session election).
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is a write conflict and attempts remain: log WARN,
//!    sleep `min(base · 2^(attempt-1), max) + uniform(0, jitter)`, retry
//! 4. Any other error (or the final conflict) is returned as-is
//!
//! The operation closure is re-invoked on every attempt, so callers must
//! re-read current state inside it rather than resubmitting stale data.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Errors that can report whether they represent a retryable write conflict
pub trait Conflicting {
    fn is_conflict(&self) -> bool;
}

/// Backoff policy for conflict retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for the exponential component
    pub max_delay: Duration,
    /// Upper bound for the uniformly random component added to each delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Exponential component of the delay after `attempt` failed (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full delay after `attempt` failed: backoff plus random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }
}

/// Run `operation` under `policy`, retrying only on conflicts.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "queue reorder")
/// * `policy` - Backoff policy
/// * `operation` - Async closure performing one full attempt
///
/// # Returns
/// Result from the first successful attempt, or the final attempt's error
pub async fn retry_on_conflict<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Conflicting + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying conflicting write");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Conflicting write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_conflict() {
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Write conflict persisted after final attempt"
                    );
                    return Err(err);
                }

                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Write conflict, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
