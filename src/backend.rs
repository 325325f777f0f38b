//! Remote collection backend
//!
//! The batch processor only knows this trait: a bulk insert per table that
//! either succeeds or fails. The shipped implementation posts JSON arrays
//! over HTTP; anything non-2xx is a delivery failure regardless of the
//! underlying cause.

use crate::config::BackendConfig;
use crate::error::TelemetryError;
use crate::event::{TelemetryEvent, WorkflowRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

/// Bulk-insert interface to the collection backend
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn insert_events(&self, rows: &[TelemetryEvent]) -> Result<(), TelemetryError>;

    async fn insert_workflows(&self, rows: &[WorkflowRecord]) -> Result<(), TelemetryError>;
}

/// HTTP backend posting to `{base_url}/rest/v1/{table}`
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build the client from configuration. A missing URL or key is an
    /// initialization failure; the caller responds by disabling the
    /// pipeline rather than surfacing an error.
    pub fn new(config: &BackendConfig) -> Result<Self, TelemetryError> {
        let base_url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TelemetryError::Initialization {
                reason: "backend URL not configured".into(),
            })?
            .trim_end_matches('/')
            .to_string();
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TelemetryError::Initialization {
                reason: "backend API key not configured".into(),
            })?;

        let mut headers = HeaderMap::new();
        let mut key_value =
            HeaderValue::from_str(api_key).map_err(|_| TelemetryError::Initialization {
                reason: "backend API key contains invalid header characters".into(),
            })?;
        key_value.set_sensitive(true);
        headers.insert("apikey", key_value.clone());
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
            TelemetryError::Initialization {
                reason: "backend API key contains invalid header characters".into(),
            }
        })?;
        bearer.set_sensitive(true);
        headers.insert("Authorization", bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TelemetryError::Initialization {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }

    async fn post<T: serde::Serialize>(
        &self,
        table: &str,
        rows: &[T],
    ) -> Result<(), TelemetryError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self.client.post(&url).json(rows).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TelemetryError::network(format!(
                "bulk insert into '{}' returned {}",
                table, status
            )))
        }
    }
}

#[async_trait]
impl TelemetryBackend for HttpBackend {
    async fn insert_events(&self, rows: &[TelemetryEvent]) -> Result<(), TelemetryError> {
        self.post("events", rows).await
    }

    async fn insert_workflows(&self, rows: &[WorkflowRecord]) -> Result<(), TelemetryError> {
        self.post("workflows", rows).await
    }
}
