//! Bounded retry with exponential backoff for write-path venue calls.
//!
//! Kept independent of the circuit breaker: a write under load should be
//! retried, not refused.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

/// Retry wrapper for order placement and venue configuration writes.
///
/// Attempt `k` (1-based) is preceded by a sleep of
/// `initial_delay * 2^(k-2)`, so the operation runs at most
/// `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    initial_delay: Duration,
}

impl RetryExecutor {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Run `op` with unbounded wall-clock (each backoff still finite).
    pub async fn execute<F, Fut, T>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_until(None, label, op).await
    }

    /// Run `op`, bounding every backoff sleep by `deadline`.
    ///
    /// Once the deadline has passed the last failure is returned instead of
    /// sleeping again, so a flaky venue cannot stretch a shutdown budget.
    pub async fn execute_until<F, Fut, T>(
        &self,
        deadline: Option<Instant>,
        label: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt > self.max_retries {
                        warn!("{} failed after {} attempts: {}", label, attempt, e);
                        return Err(e);
                    }

                    let delay = self.initial_delay * (1u32 << (attempt - 1));

                    match deadline {
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                warn!(
                                    "{} abandoned after {} attempts, deadline reached: {}",
                                    label, attempt, e
                                );
                                return Err(e);
                            }
                            let sleep_for = delay.min(deadline - now);
                            warn!(
                                "{} attempt {} failed: {}. Retrying in {:?}",
                                label, attempt, e, sleep_for
                            );
                            tokio::time::sleep(sleep_for).await;
                            if Instant::now() >= deadline {
                                warn!("{} deadline reached during backoff", label);
                                return Err(e);
                            }
                        }
                        None => {
                            warn!(
                                "{} attempt {} failed: {}. Retrying in {:?}",
                                label, attempt, e, delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }
}
