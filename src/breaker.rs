//! Circuit breaker for the delivery path
//!
//! Three states: closed (normal delivery), open (backend considered down,
//! no delivery attempts), half-open (a bounded number of trial deliveries
//! probe recovery). The open-to-half-open transition is observed lazily on
//! the next admission check after the reset timeout elapses.

use crate::config::BreakerConfig;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// Breaker state, as exposed on the metrics surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    /// Whether the next delivery attempt would be admitted
    pub can_retry: bool,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_trials: u32,
    half_open_successes: u32,
}

/// Gate in front of every delivery attempt
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_trials: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// State check and transition, called before every delivery attempt.
    /// In half-open, each admission consumes one of the trial slots.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e > self.config.reset_timeout) {
                    debug!("circuit breaker transitioning to half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_trials = 1;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_trials < self.config.half_open_requests {
                    inner.half_open_trials += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful delivery attempt
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_requests {
                    debug!("circuit breaker closed after successful trial deliveries");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_trials = 0;
                    inner.half_open_successes = 0;
                }
            }
            _ => {
                inner.failure_count = 0;
            }
        }
    }

    /// Record a failed delivery attempt
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                // A single trial failure sends us straight back to open
                warn!("circuit breaker reopened after failed trial delivery");
                inner.state = BreakerState::Open;
                inner.half_open_trials = 0;
                inner.half_open_successes = 0;
            }
            _ => {
                inner.failure_count += 1;
                if inner.state == BreakerState::Closed
                    && inner.failure_count >= self.config.failure_threshold
                {
                    warn!(
                        "circuit breaker opened after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = BreakerState::Open;
                }
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let can_retry = match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => inner
                .last_failure
                .map(|t| t.elapsed() > self.config.reset_timeout)
                .unwrap_or(true),
            BreakerState::HalfOpen => inner.half_open_trials < self.config.half_open_requests,
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            can_retry,
        }
    }

    /// Force closed, clearing all counters (support hook)
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_trials = 0;
        inner.half_open_successes = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
