//! Vision extraction client
//!
//! Sends a screenshot to the vision-extraction service and returns the
//! readings it found. The service sees the filename timestamp as context
//! only: any time it echoes back is discarded, since [`ExtractedFields`]
//! has no timestamp field.
//!
//! # Error shape
//! HTTP 429 and 503 are turned into messages the adaptive executor
//! recognizes as throttling ("rate limit", "overloaded"), so they are
//! re-queued instead of failed.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::NaiveDateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::ExtractedFields;

/// Default timeout for one extraction call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Vision oracle errors
#[derive(Debug, Error)]
pub enum VisionError {
    /// Upstream throttling (HTTP 429)
    #[error("Rate limited by vision service (HTTP 429): {0}")]
    RateLimited(String),

    /// Upstream temporarily unavailable (HTTP 503)
    #[error("Vision service overloaded (HTTP 503): {0}")]
    Overloaded(String),

    #[error("Vision service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Vision request failed: {0}")]
    Network(String),

    #[error("Vision request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid vision response: {0}")]
    InvalidResponse(String),

    #[error("Vision client configuration error: {0}")]
    Config(String),
}

/// Extraction oracle boundary
#[async_trait]
pub trait VisionExtractor: Send + Sync {
    /// Extract readings from one image
    ///
    /// `forced_timestamp` is the filename time, passed so the oracle never
    /// has to infer one.
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        forced_timestamp: NaiveDateTime,
    ) -> Result<ExtractedFields, VisionError>;

    /// Extractor name for logging
    fn name(&self) -> &'static str;
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionClientConfig {
    /// Extraction endpoint URL
    pub endpoint: String,
    /// Bearer token; `None` sends no Authorization header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Model identifier forwarded to the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for VisionClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1/extract".to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            model: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest<'a> {
    image: String,
    mime_type: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// reqwest-based [`VisionExtractor`]
pub struct HttpVisionClient {
    http_client: Client,
    config: VisionClientConfig,
    timeout: Duration,
}

impl HttpVisionClient {
    /// Create client; fails only if the HTTP client cannot be built
    pub fn new(config: VisionClientConfig) -> Result<Self, VisionError> {
        if config.endpoint.trim().is_empty() {
            return Err(VisionError::Config("vision endpoint is empty".to_string()));
        }
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
            timeout,
        })
    }

    /// Configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl VisionExtractor for HttpVisionClient {
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        forced_timestamp: NaiveDateTime,
    ) -> Result<ExtractedFields, VisionError> {
        let request = ExtractRequest {
            image: BASE64.encode(image),
            mime_type,
            timestamp: forced_timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            model: self.config.model.as_deref(),
        };

        debug!(
            endpoint = %self.config.endpoint,
            bytes = image.len(),
            mime_type,
            "Sending screenshot to vision service"
        );

        let mut builder = self.http_client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                VisionError::Timeout(self.timeout)
            } else {
                VisionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, body);
            warn!(status = status.as_u16(), error = %error, "Vision service error");
            return Err(error);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

        parse_fields(body)
    }

    fn name(&self) -> &'static str {
        "http-vision"
    }
}

/// Map a non-success status to an error
pub fn status_error(status: StatusCode, body: String) -> VisionError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => VisionError::RateLimited(body),
        StatusCode::SERVICE_UNAVAILABLE => VisionError::Overloaded(body),
        other => VisionError::Status {
            status: other.as_u16(),
            body,
        },
    }
}

/// Parse a response body: either the fields object or `{"fields": {...}}`
pub fn parse_fields(body: serde_json::Value) -> Result<ExtractedFields, VisionError> {
    let fields = match body {
        serde_json::Value::Object(mut map) if map.get("fields").map_or(false, |f| f.is_object()) => {
            map.remove("fields").unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(map),
        other => {
            return Err(VisionError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    serde_json::from_value(fields).map_err(|e| VisionError::InvalidResponse(e.to_string()))
}

/// MIME type sniffed from the image bytes, falling back to the extension
pub fn detect_mime_type(image: &[u8], file_name: &str) -> &'static str {
    infer::get(image)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
        .unwrap_or_else(|| mime_type_for(file_name))
}

/// MIME type from a file extension
pub fn mime_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
