//! Bounded retry with exponential backoff.
//!
//! Every retry in the driver is capped by an attempt count and a backoff
//! ceiling; there is no "retry forever" mode.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Parameters for a bounded retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    /// Multiplier applied per attempt (1.0 keeps the delay constant)
    pub backoff_multiplier: f64,
    /// Fraction of random extra delay added to each backoff (0.0 = none)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider_rpc()
    }
}

impl RetryPolicy {
    /// Policy for provider Mount calls retried on `Unavailable`.
    pub fn provider_rpc() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Short policy absorbing write conflicts against the status store.
    pub fn status_update() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            backoff_multiplier: 1.0,
            jitter: 0.1,
        }
    }

    /// Calculate the backoff before a given attempt (0-indexed, 0 = no wait).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(1.0 + extra)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt ceiling is reached. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let backoff = policy.jittered(policy.backoff_for_attempt(attempt));
            debug!(
                operation = %operation_name,
                attempt = attempt + 1,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying after backoff"
            );
            tokio::time::sleep(backoff).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !is_retryable(&e) {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }
    }
}
