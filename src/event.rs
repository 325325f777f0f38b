//! Telemetry record types
//!
//! Two record kinds flow through the pipeline: plain usage events and
//! workflow summaries. Workflow summaries carry a deterministic content
//! fingerprint used to deduplicate identical workflows within a flush.

use crate::error::TelemetryError;
use crate::sanitize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Hard bound on workflow size; anything larger is rejected outright
pub const MAX_WORKFLOW_NODES: usize = 500;

/// Distinct node types kept per workflow summary
pub const MAX_NODE_TYPES: usize = 30;

/// A single usage or diagnostic event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub user_id: String,
    pub event: String,
    pub properties: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TelemetryEvent {
    pub fn new(user_id: impl Into<String>, event: impl Into<String>, properties: Value) -> Self {
        Self {
            user_id: user_id.into(),
            event: event.into(),
            properties,
            created_at: Some(Utc::now()),
        }
    }
}

/// Coarse workflow size classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// Classify by node count: up to 5 simple, up to 20 medium, else complex
    pub fn from_node_count(count: usize) -> Self {
        match count {
            0..=5 => Complexity::Simple,
            6..=20 => Complexity::Medium,
            _ => Complexity::Complex,
        }
    }
}

/// Summary of a user-created workflow, sanitized for collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub user_id: String,
    pub workflow_hash: String,
    pub node_count: usize,
    pub node_types: Vec<String>,
    pub has_trigger: bool,
    pub has_webhook: bool,
    pub complexity: Complexity,
    pub sanitized_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// Build a sanitized summary from a raw workflow description.
    ///
    /// The raw value is expected to carry a `nodes` array of objects with a
    /// `type` field and optional `parameters`. Node parameters go through
    /// the property sanitizer before anything derived from them is stored
    /// or hashed.
    pub fn from_workflow(user_id: &str, workflow: &Value) -> Result<Self, TelemetryError> {
        let nodes = workflow
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| TelemetryError::Validation {
                reason: "workflow has no nodes array".into(),
            })?;

        if nodes.len() > MAX_WORKFLOW_NODES {
            return Err(TelemetryError::Validation {
                reason: format!("workflow exceeds {} nodes", MAX_WORKFLOW_NODES),
            });
        }

        let mut node_types: Vec<String> = Vec::new();
        let mut has_trigger = false;
        let mut has_webhook = false;
        let mut sanitized_nodes: Vec<Value> = Vec::with_capacity(nodes.len());

        for node in nodes {
            let node_type = node
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            let lower = node_type.to_lowercase();
            if lower.contains("trigger") {
                has_trigger = true;
            }
            if lower.contains("webhook") {
                has_webhook = true;
            }

            if !node_types.contains(&node_type) {
                node_types.push(node_type.clone());
            }

            let parameters = node
                .get("parameters")
                .map(sanitize::sanitize_value)
                .unwrap_or(Value::Null);
            sanitized_nodes.push(json!({
                "type": node_type,
                "parameters": parameters,
            }));
        }

        node_types.sort();
        node_types.truncate(MAX_NODE_TYPES);

        let sanitized_payload = json!({
            "node_count": nodes.len(),
            "nodes": sanitized_nodes,
        });

        Ok(Self {
            user_id: user_id.to_string(),
            workflow_hash: fingerprint(&sanitized_payload),
            node_count: nodes.len(),
            node_types,
            has_trigger,
            has_webhook,
            complexity: Complexity::from_node_count(nodes.len()),
            sanitized_payload,
            created_at: Some(Utc::now()),
        })
    }
}

/// Union of the two record kinds, used by the dead-letter queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Event(TelemetryEvent),
    Workflow(WorkflowRecord),
}

/// Deterministic content fingerprint: SHA-256 over canonical (sorted-key)
/// JSON, hex-encoded. Identical sanitized content always hashes the same
/// regardless of property insertion order.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let elems: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elems.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Build a workflow JSON value from parts, for callers that assemble
/// workflows programmatically
pub fn workflow_value(nodes: Vec<Value>) -> Value {
    let mut map = Map::new();
    map.insert("nodes".into(), Value::Array(nodes));
    Value::Object(map)
}
