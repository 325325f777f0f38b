//! Producer-facing telemetry API
//!
//! The only surface application code touches. Every call is rate-limited
//! and validated synchronously, then enqueued for the batch processor;
//! producers never block on network I/O and never see an error. A tracker
//! that fails to initialize (or is configured off) becomes a no-op.

use crate::backend::{HttpBackend, TelemetryBackend};
use crate::breaker::BreakerState;
use crate::config::TelemetryConfig;
use crate::event::{TelemetryEvent, WorkflowRecord};
use crate::metrics::{MetricsSnapshot, TelemetryMetrics};
use crate::processor::BatchProcessor;
use crate::rate_limit::RateLimiter;
use crate::shutdown;
use crate::validate::EventValidator;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collects usage and diagnostic events from the host application
pub struct EventTracker {
    metrics: Arc<TelemetryMetrics>,
    inner: Option<TrackerInner>,
}

struct TrackerInner {
    user_id: String,
    limiter: RateLimiter,
    validator: EventValidator,
    processor: Arc<BatchProcessor>,
}

impl EventTracker {
    /// Build the tracker from configuration. Any initialization failure
    /// (missing backend URL or key, invalid config) disables the pipeline
    /// instead of surfacing an error.
    pub fn new(mut config: TelemetryConfig) -> Self {
        config.apply_env_overrides();
        if config.disabled {
            info!("telemetry disabled by configuration");
            return Self::disabled();
        }
        if let Err(e) = config.validate() {
            warn!("telemetry disabled: {}", e);
            return Self::disabled();
        }
        match HttpBackend::new(&config.backend) {
            Ok(backend) => Self::with_backend(config, Arc::new(backend)),
            Err(e) => {
                warn!("telemetry disabled: {}", e);
                Self::disabled()
            }
        }
    }

    /// Build against an explicit backend implementation
    pub fn with_backend(config: TelemetryConfig, backend: Arc<dyn TelemetryBackend>) -> Self {
        let metrics = Arc::new(TelemetryMetrics::new());
        let user_id = config
            .user_id
            .clone()
            .unwrap_or_else(anonymous_user_id);
        let processor = Arc::new(BatchProcessor::new(backend, &config, metrics.clone()));
        Self {
            metrics,
            inner: Some(TrackerInner {
                user_id,
                limiter: RateLimiter::new(config.rate_limit.clone()),
                validator: EventValidator::new(),
                processor,
            }),
        }
    }

    fn disabled() -> Self {
        Self {
            metrics: Arc::new(TelemetryMetrics::new()),
            inner: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Record a generic named event
    pub fn track_event(&self, name: &str, properties: Value) {
        self.track(name, properties);
    }

    /// Record one tool invocation
    pub fn track_tool_usage(&self, tool: &str, success: bool, duration: Duration) {
        self.track(
            "tool_used",
            json!({
                "tool": tool,
                "success": success,
                "duration_ms": duration.as_millis() as u64,
            }),
        );
    }

    /// Record a workflow creation. The workflow summary is only collected
    /// when the workflow passed the caller's own validation; the companion
    /// event is recorded either way.
    pub async fn track_workflow_creation(&self, workflow: &Value, validation_passed: bool) {
        let Some(inner) = &self.inner else { return };
        if !inner.limiter.allow() {
            self.metrics.add_dropped(1);
            return;
        }

        let mut summary: Option<WorkflowRecord> = None;
        if validation_passed {
            match WorkflowRecord::from_workflow(&inner.user_id, workflow) {
                Ok(record) => {
                    if let Some(valid) = inner.validator.validate_workflow(record) {
                        summary = Some(valid);
                    } else {
                        self.metrics.add_dropped(1);
                    }
                }
                Err(e) => {
                    debug!("dropping workflow record: {}", e);
                    self.metrics.add_dropped(1);
                }
            }
        }

        let properties = match &summary {
            Some(record) => json!({
                "node_count": record.node_count,
                "complexity": record.complexity,
                "validation_passed": validation_passed,
            }),
            None => json!({
                "node_count": 0,
                "complexity": "simple",
                "validation_passed": validation_passed,
            }),
        };
        if let Some(record) = summary {
            inner.processor.enqueue_workflow(record);
        }

        let event = TelemetryEvent::new(&inner.user_id, "workflow_created", properties);
        if let Some(valid) = inner.validator.validate_event(event) {
            inner.processor.enqueue_event(valid);
        }
    }

    /// Record an error occurrence. Context strings go through the same
    /// sanitizer as every other property.
    pub fn track_error(&self, kind: &str, context: &str, tool: Option<&str>) {
        let mut properties = json!({
            "error_kind": kind,
            "context": context,
        });
        if let Some(tool) = tool {
            properties["tool"] = json!(tool);
        }
        self.track("error_occurred", properties);
    }

    /// Current observable state of the pipeline
    pub fn metrics(&self) -> MetricsSnapshot {
        match &self.inner {
            Some(inner) => {
                self.metrics.set_rate_limit_hits(inner.limiter.hits());
                self.metrics.snapshot(
                    inner.processor.breaker_snapshot().state,
                    inner.processor.dead_letter_queue_size(),
                )
            }
            None => self.metrics.snapshot(BreakerState::Closed, 0),
        }
    }

    /// Zero all counters and the limiter's hit count
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        if let Some(inner) = &self.inner {
            inner.limiter.reset();
        }
    }

    /// Reconfigure the rate limiter at runtime
    pub fn update_rate_limits(&self, window: Option<Duration>, max_events: Option<usize>) {
        if let Some(inner) = &self.inner {
            inner.limiter.update_limits(window, max_events);
        }
    }

    /// Arm the periodic flush timer. Idempotent.
    pub fn start(&self) {
        if let Some(inner) = &self.inner {
            inner.processor.clone().start();
        }
    }

    /// Stop the timer and run a final flush. Idempotent.
    pub async fn stop(&self) {
        if let Some(inner) = &self.inner {
            inner.processor.stop().await;
        }
    }

    /// Flush on demand (support hook; the timer normally does this)
    pub async fn flush(&self) {
        if let Some(inner) = &self.inner {
            inner.processor.flush().await;
        }
    }

    /// Register a best-effort final flush on SIGINT/SIGTERM. The handler
    /// re-raises the conventional exit for the signal once the flush
    /// completes or its deadline expires.
    pub fn install_signal_flush(&self) {
        let Some(inner) = &self.inner else { return };
        if let Err(e) = shutdown::install_flush_on_signal(inner.processor.clone()) {
            warn!("could not install telemetry signal hooks: {}", e);
        }
    }

    fn track(&self, name: &str, properties: Value) {
        let Some(inner) = &self.inner else { return };
        if !inner.limiter.allow() {
            self.metrics.add_dropped(1);
            return;
        }
        let event = TelemetryEvent::new(&inner.user_id, name, properties);
        match inner.validator.validate_event(event) {
            Some(valid) => inner.processor.enqueue_event(valid),
            None => self.metrics.add_dropped(1),
        }
    }
}

/// Stable anonymous user id: a fingerprint of the local user and host,
/// never the raw values
fn anonymous_user_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let mut hasher = Sha256::new();
    hasher.update(format!("{}@{}", whoami::username(), host).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("anon-{}", &digest[..16])
}
