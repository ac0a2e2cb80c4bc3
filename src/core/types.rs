// Request and response shapes shared by the server and the generation service

use serde::{Deserialize, Serialize};

use crate::middleware::key_rotator::RotatorStatus;

/// A single structured-generation request
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GenerationRequest {
    /// Missing reads as empty so the handler can reject it with a 400
    #[serde(default)]
    pub prompt: String,
    /// JSON schema the model output should follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Overrides the configured model for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Successful generation payload
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub success: bool,
    pub object: serde_json::Value,
}

/// Rate-limit payload returned to clients with a 429
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExceededResponse {
    pub error: String,
    pub quota_exceeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Diagnostic payload for the key status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatusResponse {
    pub success: bool,
    pub status: RotatorStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
