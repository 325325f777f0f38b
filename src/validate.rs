//! Record validation
//!
//! Every record passes through here exactly once, after sanitization and
//! before entering a queue. Validation failures are terminal: the record is
//! dropped, never retried.

use crate::event::{TelemetryEvent, WorkflowRecord, MAX_NODE_TYPES, MAX_WORKFLOW_NODES};
use crate::sanitize;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Longest accepted user id
pub const MAX_USER_ID_LEN: usize = 64;

static EVENT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid event name regex"));

/// Expected JSON type for a schema-checked property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl ValueKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
        }
    }
}

/// Required properties for one event name
#[derive(Debug, Clone, Default)]
pub struct PropertySchema {
    required: Vec<(&'static str, ValueKind)>,
}

impl PropertySchema {
    pub fn require(mut self, key: &'static str, kind: ValueKind) -> Self {
        self.required.push((key, kind));
        self
    }

    fn check(&self, properties: &Value) -> Result<(), String> {
        let obj = properties
            .as_object()
            .ok_or_else(|| "properties is not an object".to_string())?;
        for (key, kind) in &self.required {
            match obj.get(*key) {
                Some(value) if kind.matches(value) => {}
                Some(_) => return Err(format!("property '{}' has wrong type", key)),
                None => return Err(format!("property '{}' is missing", key)),
            }
        }
        Ok(())
    }
}

/// Validation outcome counters
#[derive(Debug, Clone, Default)]
pub struct ValidatorStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Validates and sanitizes records before they enter the pipeline
pub struct EventValidator {
    schemas: HashMap<&'static str, PropertySchema>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Default for EventValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventValidator {
    /// Construct with schemas registered for the built-in event names.
    /// Unknown event names fall back to the generic object check.
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            "tool_used",
            PropertySchema::default()
                .require("tool", ValueKind::String)
                .require("success", ValueKind::Bool)
                .require("duration_ms", ValueKind::Number),
        );
        schemas.insert(
            "workflow_created",
            PropertySchema::default()
                .require("node_count", ValueKind::Number)
                .require("complexity", ValueKind::String)
                .require("validation_passed", ValueKind::Bool),
        );
        schemas.insert(
            "error_occurred",
            PropertySchema::default().require("error_kind", ValueKind::String),
        );
        Self {
            schemas,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Register or replace the schema for an event name
    pub fn register_schema(&mut self, event: &'static str, schema: PropertySchema) {
        self.schemas.insert(event, schema);
    }

    /// Sanitize and validate one event. Returns the record with sanitized
    /// properties, or `None` if it must be dropped.
    pub fn validate_event(&self, mut event: TelemetryEvent) -> Option<TelemetryEvent> {
        if let Err(reason) = self.check_user_id(&event.user_id) {
            return self.reject("event", reason);
        }
        if !EVENT_NAME_RE.is_match(&event.event) {
            return self.reject("event", format!("invalid event name '{}'", event.event));
        }

        event.properties = sanitize::sanitize_value(&event.properties);

        let check = match self.schemas.get(event.event.as_str()) {
            Some(schema) => schema.check(&event.properties),
            None => {
                // Generic fallback: any object is acceptable once sanitized
                if event.properties.is_object() {
                    Ok(())
                } else {
                    Err("properties is not an object".to_string())
                }
            }
        };
        if let Err(reason) = check {
            return self.reject(&event.event, reason);
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Validate a workflow summary's structural bounds
    pub fn validate_workflow(&self, record: WorkflowRecord) -> Option<WorkflowRecord> {
        if let Err(reason) = self.check_user_id(&record.user_id) {
            return self.reject("workflow", reason);
        }
        if record.node_count > MAX_WORKFLOW_NODES {
            return self.reject(
                "workflow",
                format!("node count {} over limit", record.node_count),
            );
        }
        if record.node_types.len() > MAX_NODE_TYPES {
            return self.reject(
                "workflow",
                format!("{} node types over limit", record.node_types.len()),
            );
        }
        if record.workflow_hash.len() != 64 {
            return self.reject("workflow", "malformed workflow hash".to_string());
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        Some(record)
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn check_user_id(&self, user_id: &str) -> Result<(), String> {
        if user_id.is_empty() {
            return Err("empty user id".to_string());
        }
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(format!("user id longer than {} chars", MAX_USER_ID_LEN));
        }
        Ok(())
    }

    fn reject<T>(&self, kind: &str, reason: String) -> Option<T> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        debug!("dropping invalid {} record: {}", kind, reason);
        None
    }
}
