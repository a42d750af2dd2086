//! Circuit breaker protecting log emission
//!
//! Closed: operations run and failures are counted. Once the count reaches
//! `failure_threshold` the breaker opens and operations are skipped. After
//! `cooldown_ms` the next call is a single half-open trial: success closes the
//! breaker, failure re-opens it and restarts the cooldown.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time spent open before a trial execution is allowed
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Generic protected-execution wrapper
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
    invocations: AtomicU64,
}

enum Admission {
    Run { trial: bool },
    Reject,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            invocations: AtomicU64::new(0),
        }
    }

    /// Run `op` unless the breaker is open
    ///
    /// Returns `None` when the operation was skipped or failed. An `Err` or a
    /// panic inside `op` counts as a failure; neither reaches the caller.
    pub fn execute<T, E, F>(&self, op: F) -> Option<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let trial = match self.admit() {
            Admission::Run { trial } => trial,
            Admission::Reject => return None,
        };

        match catch_unwind(AssertUnwindSafe(op)) {
            Ok(Ok(value)) => {
                self.record_success(trial);
                Some(value)
            }
            Ok(Err(error)) => {
                debug!(error = %error, "Protected operation failed");
                self.record_failure(trial);
                None
            }
            Err(payload) => {
                debug!(
                    panic = %crate::panic_message(payload.as_ref()),
                    "Protected operation panicked"
                );
                self.record_failure(trial);
                None
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Admission::Run { trial: false },
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.cooldown);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Admission::Run { trial: true }
                } else {
                    Admission::Reject
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Reject
                } else {
                    inner.trial_in_flight = true;
                    Admission::Run { trial: true }
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            debug!("Circuit breaker trial succeeded, closing");
            inner.trial_in_flight = false;
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
        inner.failure_count = 0;
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        if trial {
            inner.trial_in_flight = false;
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                failure_count = inner.failure_count,
                "Circuit breaker trial failed, re-opening"
            );
        } else if inner.state == BreakerState::Closed
            && inner.failure_count >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                failure_count = inner.failure_count,
                threshold = self.failure_threshold,
                "Circuit breaker opened"
            );
        }
    }

    /// Current state; an open breaker past its cooldown still reports `Open`
    /// until the next call performs the trial
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Failures counted since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Number of `execute` calls, admitted or not
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Force the breaker closed and clear the failure count
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(&CircuitBreakerConfig::default())
    }
}
