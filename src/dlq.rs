//! In-memory dead-letter queue
//!
//! Bounded holding area for records that failed delivery after exhausting
//! retries. Overflow evicts oldest-first; evicted records are gone (a crash
//! may lose buffered telemetry by design) and the caller accounts for them
//! as dropped. Records leave the queue only by being drained for
//! re-delivery.

use crate::event::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// A record awaiting re-delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetteredRecord {
    pub record: Record,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Bounded FIFO of undelivered records
pub struct DeadLetterQueue {
    items: Mutex<VecDeque<DeadLetteredRecord>>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append failed records, evicting oldest entries if the queue would
    /// exceed capacity. Returns how many records were evicted.
    pub fn push_batch(&self, records: Vec<Record>) -> usize {
        let now = Utc::now();
        let mut items = self.lock();
        for record in records {
            items.push_back(DeadLetteredRecord {
                record,
                failed_at: now,
                attempts: 1,
            });
        }

        let mut evicted = 0;
        while items.len() > self.capacity {
            items.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            warn!(
                "dead-letter queue at capacity ({}), evicted {} oldest record(s)",
                self.capacity, evicted
            );
        }
        evicted
    }

    /// Re-queue records whose re-delivery failed, bumping their attempt
    /// count. Same eviction rules as `push_batch`.
    pub fn requeue(&self, records: Vec<DeadLetteredRecord>) -> usize {
        let mut items = self.lock();
        for mut item in records {
            item.attempts += 1;
            item.failed_at = Utc::now();
            items.push_back(item);
        }

        let mut evicted = 0;
        while items.len() > self.capacity {
            items.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Take everything currently queued, leaving the queue empty
    pub fn drain(&self) -> Vec<DeadLetteredRecord> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetteredRecord>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}
