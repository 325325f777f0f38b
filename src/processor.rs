//! Batch processor
//!
//! Drains the record queues on a periodic timer (or on demand), assembles
//! size-bounded batches, deduplicates workflow summaries, and pushes
//! batches through the retry wrapper behind the circuit breaker. Failed
//! batches land in the dead-letter queue and are re-delivered once the
//! backend is healthy again.
//!
//! The flush path is safe to invoke concurrently: each queue kind has a
//! flushing flag, and an overlapping flush of the same kind is skipped
//! rather than duplicated.

use crate::backend::TelemetryBackend;
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::TelemetryConfig;
use crate::dlq::{DeadLetterQueue, DeadLetteredRecord};
use crate::event::{Record, TelemetryEvent, WorkflowRecord};
use crate::metrics::TelemetryMetrics;
use crate::retry::RetryExecutor;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Orchestrates batching, delivery, and failure recovery
pub struct BatchProcessor {
    backend: Arc<dyn TelemetryBackend>,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    dlq: DeadLetterQueue,
    metrics: Arc<TelemetryMetrics>,
    max_batch_size: usize,
    max_queue_size: usize,
    flush_interval: std::time::Duration,

    event_queue: Mutex<VecDeque<TelemetryEvent>>,
    workflow_queue: Mutex<VecDeque<WorkflowRecord>>,
    events_flushing: AtomicBool,
    workflows_flushing: AtomicBool,

    shutdown: AtomicBool,
    shutdown_notify: Notify,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Holds a queue kind's flushing flag, releasing it on drop so a cancelled
/// flush (aborted task, expired timeout) can never leave the kind stuck
struct FlushClaim<'a>(&'a AtomicBool);

impl<'a> FlushClaim<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlushClaim(flag))
    }
}

impl Drop for FlushClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchProcessor {
    pub fn new(
        backend: Arc<dyn TelemetryBackend>,
        config: &TelemetryConfig,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            retry: RetryExecutor::new(config.retry.clone()),
            dlq: DeadLetterQueue::new(config.batch.dlq_capacity),
            metrics,
            max_batch_size: config.batch.max_batch_size,
            max_queue_size: config.batch.max_queue_size,
            flush_interval: config.batch.flush_interval,
            event_queue: Mutex::new(VecDeque::new()),
            workflow_queue: Mutex::new(VecDeque::new()),
            events_flushing: AtomicBool::new(false),
            workflows_flushing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            timer: Mutex::new(None),
        }
    }

    /// Append a validated event; never blocks on network I/O. A full queue
    /// drops its oldest record.
    pub fn enqueue_event(&self, event: TelemetryEvent) {
        let mut queue = lock(&self.event_queue);
        queue.push_back(event);
        if queue.len() > self.max_queue_size {
            queue.pop_front();
            self.metrics.add_dropped(1);
            debug!("event queue full, dropped oldest record");
        }
    }

    /// Append a validated workflow summary; same bounds as events
    pub fn enqueue_workflow(&self, record: WorkflowRecord) {
        let mut queue = lock(&self.workflow_queue);
        queue.push_back(record);
        if queue.len() > self.max_queue_size {
            queue.pop_front();
            self.metrics.add_dropped(1);
            debug!("workflow queue full, dropped oldest record");
        }
    }

    /// Arm the periodic flush timer. Calling again while running is a no-op.
    pub fn start(self: Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.is_some() {
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let processor = Arc::clone(&self);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(processor.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // real flush happens one interval after start
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if processor.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        processor.flush().await;
                    }
                    _ = processor.shutdown_notify.notified() => {
                        // A stale permit from an earlier stop is ignored
                        if processor.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the timer and run one final best-effort flush. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
        let handle = lock(&self.timer).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.flush().await;
    }

    /// Drain the queues and deliver everything in size-bounded batches.
    ///
    /// Safe under concurrent invocation; a queue kind already being flushed
    /// elsewhere is skipped. The circuit breaker is consulted once per
    /// flush and updated once based on whether any batch failed.
    pub async fn flush(&self) {
        let start = Instant::now();

        let events_claim = FlushClaim::try_acquire(&self.events_flushing);
        let workflows_claim = FlushClaim::try_acquire(&self.workflows_flushing);

        let events: Vec<TelemetryEvent> = if events_claim.is_some() {
            lock(&self.event_queue).drain(..).collect()
        } else {
            Vec::new()
        };
        let workflows: Vec<WorkflowRecord> = if workflows_claim.is_some() {
            dedup_by_hash(lock(&self.workflow_queue).drain(..).collect())
        } else {
            Vec::new()
        };

        let total = events.len() + workflows.len();
        let mut delivery_clean = true;

        if total > 0 {
            if !self.breaker.should_allow() {
                self.metrics.add_dropped(total as u64);
                debug!(
                    "circuit breaker open, dropped {} queued record(s) without delivery",
                    total
                );
                delivery_clean = false;
            } else {
                let mut failed: Vec<Record> = Vec::new();
                for chunk in events.chunks(self.max_batch_size) {
                    if !self.send_event_rows(chunk).await {
                        failed.extend(chunk.iter().cloned().map(Record::Event));
                    }
                }
                for chunk in workflows.chunks(self.max_batch_size) {
                    if !self.send_workflow_rows(chunk).await {
                        failed.extend(chunk.iter().cloned().map(Record::Workflow));
                    }
                }

                if failed.is_empty() {
                    self.breaker.record_success();
                } else {
                    delivery_clean = false;
                    let evicted = self.dlq.push_batch(failed);
                    self.metrics.add_dropped(evicted as u64);
                    self.breaker.record_failure();
                }
            }
        }

        // One reprocessing pass per flush cycle, only when this cycle saw
        // no failures; the pass re-checks the breaker itself
        if delivery_clean && !self.dlq.is_empty() {
            self.reprocess_dead_letters().await;
        }

        drop(events_claim);
        drop(workflows_claim);
        self.metrics.record_flush(start.elapsed());
    }

    /// Re-deliver everything currently dead-lettered, one pass, breaker
    /// permitting. Renewed failures go back to the queue.
    async fn reprocess_dead_letters(&self) {
        if !self.breaker.should_allow() {
            return;
        }
        let items = self.dlq.drain();
        if items.is_empty() {
            return;
        }
        debug!("reprocessing {} dead-lettered record(s)", items.len());

        let mut event_items: Vec<(TelemetryEvent, DeadLetteredRecord)> = Vec::new();
        let mut workflow_items: Vec<(WorkflowRecord, DeadLetteredRecord)> = Vec::new();
        for item in items {
            match &item.record {
                Record::Event(e) => event_items.push((e.clone(), item)),
                Record::Workflow(w) => workflow_items.push((w.clone(), item)),
            }
        }

        let mut requeue: Vec<DeadLetteredRecord> = Vec::new();
        for chunk in event_items.chunks(self.max_batch_size) {
            let rows: Vec<TelemetryEvent> = chunk.iter().map(|(e, _)| e.clone()).collect();
            if !self.send_event_rows(&rows).await {
                requeue.extend(chunk.iter().map(|(_, item)| item.clone()));
            }
        }
        for chunk in workflow_items.chunks(self.max_batch_size) {
            let rows: Vec<WorkflowRecord> = chunk.iter().map(|(w, _)| w.clone()).collect();
            if !self.send_workflow_rows(&rows).await {
                requeue.extend(chunk.iter().map(|(_, item)| item.clone()));
            }
        }

        if requeue.is_empty() {
            self.breaker.record_success();
        } else {
            warn!(
                "{} dead-lettered record(s) failed re-delivery, keeping them queued",
                requeue.len()
            );
            let evicted = self.dlq.requeue(requeue);
            self.metrics.add_dropped(evicted as u64);
            self.breaker.record_failure();
        }
    }

    async fn send_event_rows(&self, rows: &[TelemetryEvent]) -> bool {
        let backend = self.backend.as_ref();
        let sent = self
            .retry
            .execute(
                move || async move { backend.insert_events(rows).await },
                "event batch",
            )
            .await
            .is_some();
        self.account_batch(sent, rows.len());
        sent
    }

    async fn send_workflow_rows(&self, rows: &[WorkflowRecord]) -> bool {
        let backend = self.backend.as_ref();
        let sent = self
            .retry
            .execute(
                move || async move { backend.insert_workflows(rows).await },
                "workflow batch",
            )
            .await
            .is_some();
        self.account_batch(sent, rows.len());
        sent
    }

    fn account_batch(&self, sent: bool, rows: usize) {
        if sent {
            self.metrics.add_batch_sent();
            self.metrics.add_tracked(rows as u64);
        } else {
            self.metrics.add_batch_failed();
            self.metrics.add_failed(rows as u64);
        }
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Support hook: force the breaker closed
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    pub fn dead_letter_queue_size(&self) -> usize {
        self.dlq.len()
    }

    pub fn metrics(&self) -> &TelemetryMetrics {
        &self.metrics
    }

    #[cfg(test)]
    fn queued_events(&self) -> usize {
        lock(&self.event_queue).len()
    }
}

/// Keep the first record for each workflow hash, preserving order
fn dedup_by_hash(records: Vec<WorkflowRecord>) -> Vec<WorkflowRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.workflow_hash.clone()))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned queue is still a usable queue
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RetryConfig, TelemetryConfig};
    use crate::event::workflow_value;
    use crate::testing::MockBackend;
    use serde_json::json;

    fn test_config() -> TelemetryConfig {
        TelemetryConfig {
            retry: RetryConfig {
                max_retries: 1,
                skip_delays: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn processor_with(config: TelemetryConfig) -> (Arc<BatchProcessor>, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        let metrics = Arc::new(TelemetryMetrics::new());
        let processor = Arc::new(BatchProcessor::new(backend.clone(), &config, metrics));
        (processor, backend)
    }

    fn event(n: usize) -> TelemetryEvent {
        TelemetryEvent::new("user-1", "test_event", json!({"n": n}))
    }

    fn workflow(node_count: usize) -> WorkflowRecord {
        let nodes = (0..node_count)
            .map(|i| json!({"type": format!("t{}", i), "parameters": {}}))
            .collect();
        WorkflowRecord::from_workflow("user-1", &workflow_value(nodes)).unwrap()
    }

    #[tokio::test]
    async fn test_batch_partitioning_75_into_50_and_25() {
        let (processor, backend) = processor_with(test_config());
        for n in 0..75 {
            processor.enqueue_event(event(n));
        }
        processor.flush().await;

        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.event_count(), 75);
        let snapshot = processor.metrics.snapshot(
            processor.breaker_snapshot().state,
            processor.dead_letter_queue_size(),
        );
        assert_eq!(snapshot.batches_sent, 2);
        assert_eq!(snapshot.events_tracked, 75);
    }

    #[tokio::test]
    async fn test_workflow_dedup_within_flush() {
        let (processor, backend) = processor_with(test_config());
        let a = workflow(3);
        processor.enqueue_workflow(a.clone());
        processor.enqueue_workflow(a);
        processor.enqueue_workflow(workflow(4));
        processor.flush().await;

        assert_eq!(backend.workflow_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_lands_in_dead_letter_queue() {
        let (processor, backend) = processor_with(test_config());
        backend.fail_next(1);
        processor.enqueue_event(event(1));
        processor.enqueue_event(event(2));
        processor.flush().await;

        assert_eq!(processor.dead_letter_queue_size(), 2);
        let snapshot = processor.metrics.snapshot(
            processor.breaker_snapshot().state,
            processor.dead_letter_queue_size(),
        );
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.events_failed, 2);
    }

    #[tokio::test]
    async fn test_dead_letters_replayed_after_recovery() {
        let (processor, backend) = processor_with(test_config());
        backend.fail_next(1);
        processor.enqueue_event(event(1));
        processor.flush().await;
        assert_eq!(processor.dead_letter_queue_size(), 1);

        // Backend healthy again; the next clean flush replays the queue
        processor.enqueue_event(event(2));
        processor.flush().await;

        assert_eq!(processor.dead_letter_queue_size(), 0);
        assert_eq!(backend.event_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_flush_still_replays_dead_letters() {
        let (processor, backend) = processor_with(test_config());
        backend.fail_next(1);
        processor.enqueue_event(event(1));
        processor.flush().await;
        assert_eq!(processor.dead_letter_queue_size(), 1);

        // No new records; the dead letters drain anyway
        processor.flush().await;
        assert_eq!(processor.dead_letter_queue_size(), 0);
        assert_eq!(backend.event_count(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_makes_zero_network_calls() {
        let mut config = test_config();
        config.breaker = BreakerConfig {
            failure_threshold: 5,
            reset_timeout: std::time::Duration::from_secs(60),
            half_open_requests: 3,
        };
        let (processor, backend) = processor_with(config);

        // Five consecutive failed flushes open the breaker
        for n in 0..5 {
            backend.fail_next(1);
            processor.enqueue_event(event(n));
            processor.flush().await;
        }
        assert_eq!(
            processor.breaker_snapshot().state,
            crate::breaker::BreakerState::Open
        );
        let calls_before = backend.call_count();
        let dropped_before = processor
            .metrics
            .snapshot(processor.breaker_snapshot().state, 0)
            .events_dropped;

        processor.enqueue_event(event(10));
        processor.enqueue_event(event(11));
        processor.enqueue_event(event(12));
        processor.flush().await;

        assert_eq!(backend.call_count(), calls_before);
        let dropped_after = processor
            .metrics
            .snapshot(processor.breaker_snapshot().state, 0)
            .events_dropped;
        assert_eq!(dropped_after - dropped_before, 3);
    }

    #[tokio::test]
    async fn test_queue_bound_drops_oldest() {
        let mut config = test_config();
        config.batch.max_queue_size = 3;
        let (processor, _backend) = processor_with(config);

        for n in 0..5 {
            processor.enqueue_event(event(n));
        }
        assert_eq!(processor.queued_events(), 3);
        let snapshot = processor.metrics.snapshot(processor.breaker_snapshot().state, 0);
        assert_eq!(snapshot.events_dropped, 2);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let (processor, backend) = processor_with(test_config());
        processor.clone().start();
        processor.clone().start();
        processor.enqueue_event(event(1));
        processor.stop().await;
        processor.stop().await;

        // The final flush on stop delivered the queued event
        assert_eq!(backend.event_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_within_a_flush() {
        let mut config = test_config();
        config.retry.max_retries = 3;
        let (processor, backend) = processor_with(config);

        // Fail twice, succeed on the third underlying attempt
        backend.script(&[true, true]);
        processor.enqueue_event(event(1));
        processor.flush().await;

        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.event_count(), 1);
        let snapshot = processor.metrics.snapshot(processor.breaker_snapshot().state, 0);
        assert_eq!(snapshot.batches_sent, 1);
        assert_eq!(snapshot.batches_failed, 0);
        assert_eq!(processor.dead_letter_queue_size(), 0);
    }
}
