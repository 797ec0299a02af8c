//! Circuit breaker for read-path venue calls.
//!
//! Wraps a single operation and short-circuits it after repeated failures so
//! a misbehaving or overloaded venue cannot cascade into the rest of the
//! system. Write paths are deliberately not routed through here: an order
//! that must go out should be retried, not refused.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{KraitError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failure threshold exceeded - calls fail fast
    Open,
    /// Recovery period - a single trial call decides the next state
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Time to wait before permitting a trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Clone, Copy)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker guarding one read operation against the venue.
///
/// State transitions are serialized behind a mutex that is never held across
/// an await, so healthy calls proceed concurrently while the HALF_OPEN trial
/// slot stays exclusive. Callers may race the wrapped operation against a
/// timeout; a trial dropped mid-flight releases its slot instead of wedging
/// the breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
            total_trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned lock only means a panic elsewhere; the state itself
            // is a plain value and remains usable.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Total number of CLOSED -> OPEN trips since construction
    pub fn total_trips(&self) -> u64 {
        self.total_trips.load(Ordering::Relaxed)
    }

    /// Invoke `op` through the breaker.
    ///
    /// While OPEN and inside the recovery window every call fails fast with
    /// `CircuitOpen` without touching the operation. Once the window has
    /// elapsed, exactly one caller is admitted as the HALF_OPEN trial; its
    /// outcome closes or re-opens the circuit.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => Admission::Normal,
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure_time
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed < self.config.recovery_timeout {
                        return Err(KraitError::CircuitOpen {
                            retry_in: self.config.recovery_timeout - elapsed,
                        });
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit breaker transitioning to HALF-OPEN for trial call");
                    Admission::Trial
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        // Trial slot occupied; reject until it resolves
                        return Err(KraitError::CircuitOpen {
                            retry_in: Duration::ZERO,
                        });
                    }
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        };

        // If the caller abandons a trial mid-flight (e.g. a deadline fires),
        // free the slot so the next caller can run the trial instead.
        let trial_guard = match admission {
            Admission::Trial => Some(TrialSlot { breaker: self }),
            Admission::Normal => None,
        };

        let outcome = op().await;

        let mut inner = self.lock();
        match admission {
            Admission::Trial => {
                if let Some(slot) = trial_guard {
                    slot.defuse();
                }
                inner.trial_in_flight = false;
                if outcome.is_ok() {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    info!("Circuit breaker CLOSED after successful trial");
                } else {
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(Instant::now());
                    warn!("Trial call failed, circuit breaker re-OPENED");
                }
            }
            Admission::Normal => {
                if outcome.is_ok() {
                    if inner.state == CircuitState::Closed {
                        inner.failure_count = 0;
                    }
                } else {
                    inner.failure_count += 1;
                    inner.last_failure_time = Some(Instant::now());
                    if inner.state == CircuitState::Closed
                        && inner.failure_count >= self.config.failure_threshold
                    {
                        inner.state = CircuitState::Open;
                        self.total_trips.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Circuit breaker TRIPPED after {} consecutive failures",
                            inner.failure_count
                        );
                    }
                }
            }
        }

        outcome
    }
}

struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
}

impl TrialSlot<'_> {
    fn defuse(self) {
        std::mem::forget(self);
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        inner.trial_in_flight = false;
        warn!("HALF-OPEN trial abandoned before resolving, releasing slot");
    }
}
