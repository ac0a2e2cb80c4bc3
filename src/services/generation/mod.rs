pub mod gemini_client;
pub mod rate_limit;

pub use gemini_client::{GeminiClient, GenerationOutput};

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use crate::core::config::Config;
use crate::core::errors::GenerationResult;
use crate::core::types::GenerationRequest;
use crate::middleware::key_rotator::KeyRotator;
use crate::middleware::retry::{with_key_rotation_observed, RetryPolicy};
use crate::utils::Metrics;

/// Structured generation with key rotation, retries and metrics
pub struct GenerationService {
    rotator: Arc<KeyRotator>,
    client: GeminiClient,
    policy: RetryPolicy,
    metrics: Metrics,
}

impl GenerationService {
    pub fn new(
        rotator: Arc<KeyRotator>,
        client: GeminiClient,
        policy: RetryPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            rotator,
            client,
            policy,
            metrics,
        }
    }

    /// Wire the service from configuration, sharing the given rotator
    pub fn from_config(config: &Config, rotator: Arc<KeyRotator>, metrics: Metrics) -> Result<Self> {
        let client = GeminiClient::new(&config.api)?;
        Ok(Self::new(
            rotator,
            client,
            RetryPolicy::from(&config.retry),
            metrics,
        ))
    }

    pub fn rotator(&self) -> &Arc<KeyRotator> {
        &self.rotator
    }

    #[instrument(skip(self, request), fields(prompt_len = request.prompt.len()))]
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Value> {
        let client = &self.client;
        let metrics = &self.metrics;

        let output = with_key_rotation_observed(&self.rotator, &self.policy, metrics, |key| async move {
            let start = Instant::now();
            let result = client.generate(&key, request).await;
            let duration = start.elapsed();

            match &result {
                Ok(output) => {
                    metrics.record_api_call(true, duration, output.input_tokens, output.output_tokens)
                }
                Err(e) => {
                    metrics.record_api_call(false, duration, 0, 0);
                    if e.is_rate_limit() {
                        metrics.record_rate_limited();
                    }
                }
            }
            result
        })
        .await?;

        Ok(output.object)
    }
}
