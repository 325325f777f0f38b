//! Property sanitization
//!
//! Strips anything resembling a secret, address, or identifier from record
//! properties before they leave the process. Sanitization is idempotent:
//! every redaction marker is chosen so it cannot re-match any of the
//! redaction patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

/// Containers nested deeper than this are replaced with a marker
pub const MAX_DEPTH: usize = 3;

/// Arrays longer than this are truncated
pub const MAX_ARRAY_LEN: usize = 10;

/// Property keys matching any of these (case-insensitive substring) are
/// dropped entirely rather than redacted
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "apikey",
    "api_key",
    "secret",
    "credential",
    "auth",
    "url",
    "endpoint",
    "host",
    "database",
    "connection",
    "key",
];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s'\x22]+").expect("valid url regex"));

/// Long opaque strings of token-ish characters (keys, hashes, bearer tokens)
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_-]{32,}").expect("valid token regex"));

/// Whether a property key names something that must never be collected
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

/// Redact secrets, emails, URLs, and opaque tokens from a string
pub fn sanitize_str(input: &str) -> String {
    let step = EMAIL_RE.replace_all(input, "[email]");
    let step = URL_RE.replace_all(&step, |caps: &regex::Captures| {
        let path = Url::parse(&caps[0])
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        format!("[url:{}]", path)
    });
    TOKEN_RE.replace_all(&step, "[token]").into_owned()
}

/// Recursively sanitize a property value
pub fn sanitize_value(value: &Value) -> Value {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_str(s)),
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                return Value::String("[truncated]".into());
            }
            let mut out = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) {
                    continue;
                }
                out.insert(key.clone(), sanitize_at_depth(val, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                return Value::String("[truncated]".into());
            }
            Value::Array(
                items
                    .iter()
                    .take(MAX_ARRAY_LEN)
                    .map(|v| sanitize_at_depth(v, depth + 1))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}
