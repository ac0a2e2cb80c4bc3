use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::config::ApiConfig;
use crate::core::errors::{GenerationError, GenerationResult};
use crate::core::types::GenerationRequest;
use crate::services::generation::rate_limit::translate_http_error;

/// Parsed model output plus token accounting
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub object: Value,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Gemini `generateContent` client.
///
/// The API key is an argument of every call rather than client state, so one
/// client serves every key in the rotation.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl GeminiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        // Create HTTP client with timeout and connection pooling
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Perform one structured generation call with the given key.
    ///
    /// Non-success statuses are translated into `RateLimited` or `Upstream`;
    /// a body that cannot be read as JSON becomes `InvalidResponse`.
    #[instrument(skip(self, api_key, request), fields(model))]
    pub async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> GenerationResult<GenerationOutput> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        tracing::Span::current().record("model", model);

        let body = build_request_body(request);

        let response = self
            .http_client
            .post(self.endpoint(model))
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let error_text = response.text().await.unwrap_or_default();
            debug!("Generation request failed with status {}", status);
            return Err(translate_http_error(
                status.as_u16(),
                retry_after.as_deref(),
                &error_text,
            ));
        }

        let response_text = response.text().await?;
        let response: Value = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::InvalidResponse(format!("response is not JSON: {e}")))?;

        let (input_tokens, output_tokens) = extract_token_usage(&response);
        let text = extract_candidate_text(&response)?;
        let object = parse_model_json(&text)?;

        Ok(GenerationOutput {
            object,
            input_tokens,
            output_tokens,
        })
    }
}

/// Request body for `generateContent`
pub fn build_request_body(request: &GenerationRequest) -> Value {
    let mut body = serde_json::json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": request.prompt}]
        }],
        "generationConfig": {
            "response_mime_type": "application/json"
        }
    });

    if let Some(schema) = &request.schema {
        body["generationConfig"]["response_schema"] = schema.clone();
    }
    if let Some(temperature) = request.temperature {
        body["generationConfig"]["temperature"] = serde_json::json!(temperature);
    }

    body
}

fn extract_candidate_text(response: &Value) -> GenerationResult<String> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| GenerationError::InvalidResponse("Missing candidates in API response".to_string()))?;

    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse(
            "Missing text in API response".to_string(),
        ));
    }
    Ok(text)
}

/// Read model output as JSON, salvaging the outermost `{...}` when the model
/// wrapped it in prose or code fences.
pub fn parse_model_json(text: &str) -> GenerationResult<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(first), Some(last)) if last > first => &text[first..=last],
        _ => {
            return Err(GenerationError::InvalidResponse(
                "model output contains no JSON object".to_string(),
            ))
        }
    };

    debug!("Recovering JSON object from surrounding model text");
    serde_json::from_str(candidate)
        .map_err(|e| GenerationError::InvalidResponse(format!("model output is not valid JSON: {e}")))
}

fn extract_token_usage(response: &Value) -> (u64, u64) {
    let usage_metadata = &response["usageMetadata"];
    let input_tokens = usage_metadata["promptTokenCount"].as_u64().unwrap_or(0);
    let output_tokens = usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0);

    (input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_with_schema() {
        let request = GenerationRequest {
            prompt: "List topics".to_string(),
            schema: Some(json!({"type": "object"})),
            model: None,
            temperature: Some(0.7),
        };

        let body = build_request_body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "List topics");
        assert_eq!(body["generationConfig"]["response_schema"]["type"], "object");
        assert_eq!(body["generationConfig"]["response_mime_type"], "application/json");
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn test_request_body_without_schema() {
        let body = build_request_body(&GenerationRequest::new("hi"));
        assert!(body["generationConfig"].get("response_schema").is_none());
        assert!(body["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_parse_model_json_recovers_wrapped_object() {
        let text = "Here you go:\n```json\n{\"topics\": [{\"title\": \"Graphs\"}]}\n```";
        let value = parse_model_json(text).unwrap();
        assert_eq!(value["topics"][0]["title"], "Graphs");
    }

    #[test]
    fn test_parse_model_json_rejects_garbage() {
        assert!(matches!(
            parse_model_json("no json here"),
            Err(GenerationError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_model_json("} backwards {"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_candidate_text_and_usage() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8}
        });

        assert_eq!(extract_candidate_text(&response).unwrap(), "{\"a\":1}");
        assert_eq!(extract_token_usage(&response), (120, 8));

        let empty = json!({"candidates": []});
        assert!(extract_candidate_text(&empty).is_err());
    }
}
