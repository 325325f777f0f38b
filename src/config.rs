//! Pipeline configuration
//!
//! Every knob has a serde default so a bare `TelemetryConfig::default()` is
//! a working production configuration. Durations are written in humantime
//! form ("5s", "60s") when loaded from TOML.

use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the telemetry pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Disable the pipeline entirely; every tracker call becomes a no-op
    #[serde(default)]
    pub disabled: bool,

    /// Stable anonymous user id; derived from a machine fingerprint if unset
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

/// Sliding-window admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Trailing window length
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Maximum admissions within the window
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

/// Batch assembly and queue bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Periodic flush interval
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum records per delivery batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum records buffered per queue kind before oldest are dropped
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Dead-letter queue capacity
    #[serde(default = "default_dlq_capacity")]
    pub dlq_capacity: usize,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before probing recovery
    #[serde(default = "default_reset_timeout", with = "humantime_serde")]
    pub reset_timeout: Duration,

    /// Trial deliveries admitted while half-open
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

/// Retry wrapper behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delivery attempts per batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles each attempt
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter factor applied on top of the backoff delay (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Per-attempt operation timeout
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Skip inter-attempt delays (test/deterministic mode)
    #[serde(default)]
    pub skip_delays: bool,
}

/// Remote collection backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the collection endpoint
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent with every bulk insert
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_events: default_max_events(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            max_batch_size: default_max_batch_size(),
            max_queue_size: default_max_queue_size(),
            dlq_capacity: default_dlq_capacity(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter_factor: default_jitter_factor(),
            operation_timeout: default_operation_timeout(),
            skip_delays: false,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from a TOML file
    pub fn from_path(path: &Path) -> Result<Self, TelemetryError> {
        let content = std::fs::read_to_string(path).map_err(|e| TelemetryError::Config {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        let mut config: TelemetryConfig =
            toml::from_str(&content).map_err(|e| TelemetryError::Config {
                reason: format!("failed to parse {}: {}", path.display(), e),
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `BEACON_*` environment overrides on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("BEACON_DISABLED") {
            self.disabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(url) = std::env::var("BEACON_BACKEND_URL") {
            if !url.is_empty() {
                self.backend.url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("BEACON_API_KEY") {
            if !key.is_empty() {
                self.backend.api_key = Some(key);
            }
        }
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.rate_limit.max_events == 0 {
            return Err(TelemetryError::Config {
                reason: "rate_limit.max_events must be greater than 0".into(),
            });
        }
        if self.batch.max_batch_size == 0 {
            return Err(TelemetryError::Config {
                reason: "batch.max_batch_size must be greater than 0".into(),
            });
        }
        if self.breaker.failure_threshold == 0 {
            return Err(TelemetryError::Config {
                reason: "breaker.failure_threshold must be greater than 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(TelemetryError::Config {
                reason: "retry.jitter_factor must be between 0.0 and 1.0".into(),
            });
        }
        Ok(())
    }
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_events() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_dlq_capacity() -> usize {
    500
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_half_open_requests() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_production_values() {
        let config = TelemetryConfig::default();
        assert!(!config.disabled);
        assert_eq!(config.rate_limit.max_events, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.batch.max_batch_size, 50);
        assert_eq!(config.batch.flush_interval, Duration::from_secs(5));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.half_open_requests, 3);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.operation_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[rate_limit]
window = "30s"
max_events = 50

[batch]
flush_interval = "10s"

[retry]
skip_delays = true
"#
        )
        .unwrap();

        let config = TelemetryConfig::from_path(file.path()).unwrap();
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.rate_limit.max_events, 50);
        assert_eq!(config.batch.flush_interval, Duration::from_secs(10));
        assert!(config.retry.skip_delays);
        // Untouched sections keep their defaults
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TelemetryConfig {
            rate_limit: RateLimitConfig {
                max_events: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TelemetryConfig {
            retry: RetryConfig {
                jitter_factor: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
