//! Pipeline metrics
//!
//! Monotonic counters plus a rolling window of flush durations. This is the
//! only surface through which the host application can observe telemetry
//! degradation; everything else fails silently.

use crate::breaker::BreakerState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Flush duration samples retained for the rolling average
const FLUSH_WINDOW: usize = 100;

/// Shared counters, updated from the tracker and the batch processor
#[derive(Default)]
pub struct TelemetryMetrics {
    events_tracked: AtomicU64,
    events_dropped: AtomicU64,
    events_failed: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    rate_limit_hits: AtomicU64,
    flush_times: Mutex<FlushWindow>,
}

#[derive(Default)]
struct FlushWindow {
    samples: VecDeque<Duration>,
    last_flush: Option<DateTime<Utc>>,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tracked(&self, n: u64) {
        self.events_tracked.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, n: u64) {
        self.events_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_failed(&self, n: u64) {
        self.events_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rate_limit_hits(&self, total: u64) {
        self.rate_limit_hits.store(total, Ordering::Relaxed);
    }

    /// Record one flush's wall-clock duration
    pub fn record_flush(&self, duration: Duration) {
        let mut window = self.flush_times.lock().unwrap_or_else(|e| e.into_inner());
        window.samples.push_back(duration);
        while window.samples.len() > FLUSH_WINDOW {
            window.samples.pop_front();
        }
        window.last_flush = Some(Utc::now());
    }

    /// Assemble the observable snapshot. Breaker state and DLQ size live
    /// elsewhere and are supplied by the caller.
    pub fn snapshot(
        &self,
        breaker_state: BreakerState,
        dead_letter_queue_size: usize,
    ) -> MetricsSnapshot {
        let window = self.flush_times.lock().unwrap_or_else(|e| e.into_inner());
        let average_flush_time = if window.samples.is_empty() {
            Duration::ZERO
        } else {
            window.samples.iter().sum::<Duration>() / window.samples.len() as u32
        };
        MetricsSnapshot {
            events_tracked: self.events_tracked.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            average_flush_time_ms: average_flush_time.as_millis() as u64,
            last_flush_time: window.last_flush,
            circuit_breaker_state: breaker_state,
            dead_letter_queue_size,
        }
    }

    /// Zero every counter and clear the flush window
    pub fn reset(&self) {
        self.events_tracked.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.events_failed.store(0, Ordering::Relaxed);
        self.batches_sent.store(0, Ordering::Relaxed);
        self.batches_failed.store(0, Ordering::Relaxed);
        self.rate_limit_hits.store(0, Ordering::Relaxed);
        let mut window = self.flush_times.lock().unwrap_or_else(|e| e.into_inner());
        window.samples.clear();
        window.last_flush = None;
    }
}

/// Point-in-time metrics view exposed to the host application
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_tracked: u64,
    pub events_dropped: u64,
    pub events_failed: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub rate_limit_hits: u64,
    pub average_flush_time_ms: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub circuit_breaker_state: BreakerState,
    pub dead_letter_queue_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = TelemetryMetrics::new();
        metrics.add_tracked(5);
        metrics.add_tracked(2);
        metrics.add_dropped(1);
        metrics.add_batch_sent();
        metrics.add_batch_failed();
        metrics.add_failed(3);

        let snapshot = metrics.snapshot(BreakerState::Closed, 0);
        assert_eq!(snapshot.events_tracked, 7);
        assert_eq!(snapshot.events_dropped, 1);
        assert_eq!(snapshot.events_failed, 3);
        assert_eq!(snapshot.batches_sent, 1);
        assert_eq!(snapshot.batches_failed, 1);
    }

    #[test]
    fn test_flush_window_rolls_over() {
        let metrics = TelemetryMetrics::new();
        for _ in 0..FLUSH_WINDOW + 50 {
            metrics.record_flush(Duration::from_millis(10));
        }
        let window = metrics.flush_times.lock().unwrap();
        assert_eq!(window.samples.len(), FLUSH_WINDOW);
    }

    #[test]
    fn test_average_flush_time() {
        let metrics = TelemetryMetrics::new();
        metrics.record_flush(Duration::from_millis(10));
        metrics.record_flush(Duration::from_millis(30));
        let snapshot = metrics.snapshot(BreakerState::Closed, 0);
        assert_eq!(snapshot.average_flush_time_ms, 20);
        assert!(snapshot.last_flush_time.is_some());
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let metrics = TelemetryMetrics::new();
        metrics.add_tracked(10);
        metrics.record_flush(Duration::from_millis(5));
        metrics.reset();

        let snapshot = metrics.snapshot(BreakerState::Closed, 0);
        assert_eq!(snapshot.events_tracked, 0);
        assert_eq!(snapshot.average_flush_time_ms, 0);
        assert!(snapshot.last_flush_time.is_none());
    }
}
