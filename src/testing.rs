//! Test doubles for the delivery path
//!
//! Shared by unit tests and the integration suite.

use crate::error::TelemetryError;
use crate::event::{TelemetryEvent, WorkflowRecord};
use crate::TelemetryBackend;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Backend that records every insert and can fail on a script.
///
/// Each call consumes one entry from the failure script (`true` = fail);
/// once the script is exhausted, calls succeed.
#[derive(Default)]
pub struct MockBackend {
    pub events: Mutex<Vec<TelemetryEvent>>,
    pub workflows: Mutex<Vec<WorkflowRecord>>,
    failure_script: Mutex<VecDeque<bool>>,
    calls: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` insert calls, then succeed
    pub fn fail_next(&self, n: usize) {
        let mut script = self.failure_script.lock().unwrap();
        script.extend(vec![true; n]);
    }

    /// Queue an explicit pass/fail sequence
    pub fn script(&self, outcomes: &[bool]) {
        let mut script = self.failure_script.lock().unwrap();
        script.extend(outcomes.iter().copied());
    }

    /// Total insert calls observed, across both tables
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.lock().unwrap().len()
    }

    fn next_outcome(&self) -> Result<(), TelemetryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failure_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        if should_fail {
            Err(TelemetryError::network("scripted failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetryBackend for MockBackend {
    async fn insert_events(&self, rows: &[TelemetryEvent]) -> Result<(), TelemetryError> {
        self.next_outcome()?;
        self.events.lock().unwrap().extend(rows.iter().cloned());
        Ok(())
    }

    async fn insert_workflows(&self, rows: &[WorkflowRecord]) -> Result<(), TelemetryError> {
        self.next_outcome()?;
        self.workflows.lock().unwrap().extend(rows.iter().cloned());
        Ok(())
    }
}
