//! # Beacon
//!
//! A best-effort telemetry delivery pipeline: collect usage and diagnostic
//! events from a running application, sanitize and validate them, and batch
//! them to a remote collection backend without ever impacting the host
//! application's availability or latency. Telemetry loss is silent by
//! design; only the metrics surface reveals degradation.
//!
//! ## Usage
//!
//! ```no_run
//! use beacon::{EventTracker, TelemetryConfig};
//! use serde_json::json;
//!
//! # async fn run() {
//! let tracker = EventTracker::new(TelemetryConfig::default());
//! tracker.start();
//! tracker.track_event("server_started", json!({"mode": "http"}));
//! // ...
//! tracker.stop().await;
//! # }
//! ```
//!
//! ## Modules
//!
//! - `backend` - Bulk-insert seam to the remote collection backend
//! - `breaker` - Three-state circuit breaker gating delivery attempts
//! - `config` - Pipeline configuration with TOML and env loading
//! - `dlq` - Bounded in-memory dead-letter queue
//! - `error` - Error taxonomy and retryability classification
//! - `event` - Record types and workflow fingerprinting
//! - `metrics` - Counters and the observable metrics snapshot
//! - `processor` - Batch assembly, delivery, and failure recovery
//! - `rate_limit` - Sliding-window admission control
//! - `retry` - Jittered exponential backoff wrapper
//! - `sanitize` - Property redaction rules
//! - `shutdown` - Flush-on-exit signal handling
//! - `tracker` - Producer-facing API
//! - `validate` - Record validation and per-event schemas
pub mod backend;
pub mod breaker;
pub mod config;
pub mod dlq;
pub mod error;
pub mod event;
pub mod metrics;
pub mod processor;
pub mod rate_limit;
pub mod retry;
pub mod sanitize;
pub mod shutdown;
pub mod tracker;
pub mod validate;

pub mod testing;

pub use backend::{HttpBackend, TelemetryBackend};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use event::{Complexity, Record, TelemetryEvent, WorkflowRecord};
pub use metrics::MetricsSnapshot;
pub use processor::BatchProcessor;
pub use rate_limit::RateLimiter;
pub use tracker::EventTracker;
