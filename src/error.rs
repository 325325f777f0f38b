//! Error taxonomy for the telemetry pipeline
//!
//! Nothing in this crate propagates errors to the host application; these
//! types classify failures internally so the batch processor can decide
//! between retrying, dead-lettering, and dropping.

use std::time::Duration;
use thiserror::Error;

/// Failures that can occur while collecting or delivering telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Record failed schema validation and was dropped
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Transport-level delivery failure
    #[error("network error: {reason}")]
    Network {
        reason: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Delivery attempt exceeded the operation timeout
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Record was not admitted by the local rate limiter
    #[error("rate limit exceeded, retry capacity in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A bounded queue evicted records to make room
    #[error("queue overflow: {dropped} oldest record(s) dropped")]
    QueueOverflow { dropped: usize },

    /// Remote client could not be constructed; the subsystem disables itself
    #[error("initialization failed: {reason}")]
    Initialization { reason: String },

    /// Invalid pipeline configuration
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl TelemetryError {
    /// Whether a delivery failure of this kind should go through the retry
    /// wrapper. Validation and rate-limit failures are terminal for the
    /// record; only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::Network { .. } | TelemetryError::Timeout { .. }
        )
    }

    pub(crate) fn network(reason: impl Into<String>) -> Self {
        TelemetryError::Network {
            reason: reason.into(),
            source: None,
        }
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TelemetryError::Timeout {
                elapsed: Duration::ZERO,
            }
        } else {
            TelemetryError::Network {
                reason: err.to_string(),
                source: Some(err),
            }
        }
    }
}
