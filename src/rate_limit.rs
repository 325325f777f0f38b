//! Sliding-window rate limiter
//!
//! Entry gate for every event. Admissions are timestamps in a trailing
//! window; the window is pruned on every call and additionally capped at a
//! fixed size so memory stays bounded even when `max_events` is
//! misconfigured far above it.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Window entries never exceed this, independent of the configured limit
pub const HARD_WINDOW_CAP: usize = 1000;

/// Rejection warnings are emitted at most this often
const WARN_INTERVAL: Duration = Duration::from_secs(60);

struct WindowState {
    window: Duration,
    max_events: usize,
    admissions: VecDeque<Instant>,
    hits: u64,
    last_warn: Option<Instant>,
}

/// Sliding-window admission control
pub struct RateLimiter {
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window: config.window,
                max_events: config.max_events,
                admissions: VecDeque::new(),
                hits: 0,
                last_warn: None,
            }),
        }
    }

    /// Admit the caller and record a timestamp, or reject and count a hit
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, now);

        if state.admissions.len() < state.max_events {
            state.admissions.push_back(now);
            // The cap bounds memory, not the logical limit: with max_events
            // configured above it, oldest entries are forgotten instead
            while state.admissions.len() > HARD_WINDOW_CAP {
                state.admissions.pop_front();
            }
            return true;
        }

        state.hits += 1;
        let should_warn = state
            .last_warn
            .map(|t| now.duration_since(t) >= WARN_INTERVAL)
            .unwrap_or(true);
        if should_warn {
            state.last_warn = Some(now);
            warn!(
                "rate limit reached ({} events / {:?}), dropping events ({} dropped so far)",
                state.max_events, state.window, state.hits
            );
        }
        false
    }

    /// Check capacity without admitting or counting a hit
    pub fn would_allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, now);
        state.admissions.len() < state.max_events
    }

    /// How long until the oldest admission exits the window. Zero when
    /// capacity is already available.
    pub fn time_until_capacity(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, now);
        if state.admissions.len() < state.max_events {
            return Duration::ZERO;
        }
        match state.admissions.front() {
            Some(oldest) => state.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    /// Reconfigure at runtime; `None` keeps the current value
    pub fn update_limits(&self, window: Option<Duration>, max_events: Option<usize>) {
        let mut state = self.lock();
        if let Some(window) = window {
            state.window = window;
        }
        if let Some(max_events) = max_events {
            state.max_events = max_events;
        }
    }

    /// Rejections since construction or the last `reset`
    pub fn hits(&self) -> u64 {
        self.lock().hits
    }

    /// Clear all state (support hook)
    pub fn reset(&self) {
        let mut state = self.lock();
        state.admissions.clear();
        state.hits = 0;
        state.last_warn = None;
    }

    fn prune(state: &mut WindowState, now: Instant) {
        let window = state.window;
        while let Some(oldest) = state.admissions.front() {
            if now.duration_since(*oldest) > window {
                state.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        // A poisoned window is still a usable window
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window: Duration, max_events: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { window, max_events })
    }

    #[test]
    fn test_admits_up_to_max_within_window() {
        let limiter = limiter(Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
        assert_eq!(limiter.hits(), 1);
    }

    #[test]
    fn test_burst_admission_bound() {
        let limiter = limiter(Duration::from_secs(60), 100);
        let mut admitted = 0;
        for _ in 0..10_000 {
            if limiter.allow() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 100);
        assert_eq!(limiter.hits(), 9_900);
    }

    #[test]
    fn test_window_expiry_restores_capacity() {
        let limiter = limiter(Duration::from_millis(50), 2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.allow());
    }

    #[test]
    fn test_would_allow_does_not_mutate() {
        let limiter = limiter(Duration::from_secs(60), 1);
        assert!(limiter.would_allow());
        assert!(limiter.would_allow());
        assert!(limiter.allow());
        assert!(!limiter.would_allow());
        // would_allow never counts a hit
        assert_eq!(limiter.hits(), 0);
    }

    #[test]
    fn test_time_until_capacity() {
        let limiter = limiter(Duration::from_secs(60), 1);
        assert_eq!(limiter.time_until_capacity(), Duration::ZERO);
        limiter.allow();
        let wait = limiter.time_until_capacity();
        assert!(wait > Duration::from_secs(55) && wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_hard_cap_bounds_memory_not_admissions() {
        let limiter = limiter(Duration::from_secs(3600), usize::MAX);
        for _ in 0..(HARD_WINDOW_CAP + 500) {
            // A pathological limit admits everything; only memory is bounded
            assert!(limiter.allow());
        }
        assert_eq!(limiter.hits(), 0);
        let state = limiter.lock();
        assert!(state.admissions.len() <= HARD_WINDOW_CAP);
    }

    #[test]
    fn test_update_limits_applies_immediately() {
        let limiter = limiter(Duration::from_secs(60), 1);
        assert!(limiter.allow());
        assert!(!limiter.allow());

        limiter.update_limits(None, Some(3));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_reset_clears_everything() {
        let limiter = limiter(Duration::from_secs(60), 1);
        limiter.allow();
        limiter.allow();
        assert_eq!(limiter.hits(), 1);

        limiter.reset();
        assert_eq!(limiter.hits(), 0);
        assert!(limiter.allow());
    }
}
