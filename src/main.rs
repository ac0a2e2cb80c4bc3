// Main entry point for the syllabus generation backend

use syllabus_gen::{
    core::{Config, GenerationError, GenerationRequest, GenerationResponse, KeyStatusResponse, QuotaExceededResponse},
    middleware::KeyRotator,
    services::{
        syllabus::{CodingProblemsRequest, SyllabusContentRequest, TopicAnswersRequest},
        GenerationService, SyllabusService,
    },
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Header that must carry the configured cache clear key
const CACHE_CLEAR_HEADER: &str = "x-cache-clear-key";

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    rotator: Arc<KeyRotator>,
    generation: Arc<GenerationService>,
    syllabus: Arc<SyllabusService>,
    metrics: Metrics,
    cache_clear_key: Option<Arc<str>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "syllabus_gen={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== SYLLABUS GENERATION BACKEND ===");
    info!(
        "Config: model={} keys={} attempts={} retry_delay={}ms",
        config.model(),
        config.api_keys().len(),
        config.retry.max_attempts,
        config.retry.retry_delay_ms
    );
    info!(
        "Q&A cache: dir={} ttl={}s clear_key={}",
        config.cache.qas_dir().display(),
        config.cache.qas_ttl_seconds,
        if config.cache_clear_key().is_some() { "set" } else { "unset" }
    );

    let metrics = Metrics::new();

    // One rotator for the whole process, handed to every caller
    let rotator = Arc::new(KeyRotator::new(config.api_keys().to_vec()));
    if rotator.is_empty() {
        warn!("No API keys configured; generation requests will fail until one is set");
    }

    let generation = Arc::new(GenerationService::from_config(
        &config,
        Arc::clone(&rotator),
        metrics.clone(),
    )?);
    let syllabus = Arc::new(SyllabusService::from_config(
        &config,
        Arc::clone(&generation),
        metrics.clone(),
    ));

    let state = AppState {
        rotator,
        generation,
        syllabus,
        metrics,
        cache_clear_key: config.cache_clear_key().map(Arc::from),
    };

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                             - Root endpoint");
    info!("  GET  /health                       - Health check");
    info!("  GET  /api/api-key-status           - API key rotation status");
    info!("  GET  /metrics                      - Prometheus metrics");
    info!("  GET  /stats                        - Detailed statistics");
    info!("  POST /api/generate                 - Structured generation (JSON)");
    info!("  POST /api/extract-topics           - Topics and relationships from a syllabus");
    info!("  POST /api/generate-topic-answers   - Exam Q&A for a topic (cached)");
    info!("  POST /api/clear-qas-cache          - Drop cached Q&A");
    info!("  POST /api/generate-coding-topics   - Programming topics from a syllabus");
    info!("  POST /api/generate-coding-problems - C problems for a topic");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/api-key-status", get(api_key_status))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/api/generate", post(generate))
        .route("/api/extract-topics", post(extract_topics))
        .route("/api/generate-topic-answers", post(generate_topic_answers))
        .route("/api/clear-qas-cache", post(clear_qas_cache))
        .route("/api/generate-coding-topics", post(generate_coding_topics))
        .route("/api/generate-coding-problems", post(generate_coding_problems))
        .with_state(state)
        .layer(cors)
}

async fn root() -> &'static str {
    "Syllabus Generation Backend"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health");
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API key rotation status, without key material
async fn api_key_status(State(state): State<AppState>) -> Json<KeyStatusResponse> {
    state.metrics.record_endpoint_request("/api/api-key-status");
    Json(KeyStatusResponse {
        success: true,
        status: state.rotator.status(),
        timestamp: chrono::Utc::now(),
    })
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

/// Structured generation endpoint
///
/// # Request Format:
/// - JSON `{ "prompt": string, "schema"?: object, "model"?: string, "temperature"?: number }`
///
/// # Response:
/// - 200 `{ "success": true, "object": ... }`
/// - 400 `{ "error": ... }` for a missing prompt or an unreadable body
/// - 429 with `Retry-After` when every attempt hit a rate limit
async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Response {
    state.metrics.record_endpoint_request("/api/generate");

    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.prompt.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing prompt");
    }

    match state.generation.generate(&request).await {
        Ok(object) => Json(GenerationResponse {
            success: true,
            object,
        })
        .into_response(),
        Err(e) => {
            error!("Generation failed: {}", e);
            generation_error_response(e)
        }
    }
}

async fn extract_topics(
    State(state): State<AppState>,
    payload: Result<Json<SyllabusContentRequest>, JsonRejection>,
) -> Response {
    state.metrics.record_endpoint_request("/api/extract-topics");

    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.content.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing content");
    }

    match state.syllabus.extract_topics(&request.content).await {
        Ok(extraction) => Json(extraction).into_response(),
        Err(e) => {
            error!("Topic extraction failed: {}", e);
            generation_error_response(e)
        }
    }
}

/// Q&A for one topic; replies carry `"cached": true` when served from disk
async fn generate_topic_answers(
    State(state): State<AppState>,
    payload: Result<Json<TopicAnswersRequest>, JsonRejection>,
) -> Response {
    state.metrics.record_endpoint_request("/api/generate-topic-answers");

    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let topic = match request.topic {
        Some(topic) if !request.content.trim().is_empty() => topic,
        _ => return error_json(StatusCode::BAD_REQUEST, "Missing content or topic"),
    };

    match state.syllabus.generate_topic_answers(&request.content, &topic).await {
        Ok(answers) => Json(answers).into_response(),
        Err(e) => {
            error!("Q&A generation failed: {}", e);
            generation_error_response(e)
        }
    }
}

/// Drop every cached Q&A entry, guarded by the clear key when one is configured
async fn clear_qas_cache(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.metrics.record_endpoint_request("/api/clear-qas-cache");

    if let Some(expected) = state.cache_clear_key.as_deref() {
        let supplied = headers.get(CACHE_CLEAR_HEADER).and_then(|v| v.to_str().ok());
        if supplied != Some(expected) {
            warn!("Rejected Q&A cache clear without a valid {} header", CACHE_CLEAR_HEADER);
            return error_json(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }

    match state.syllabus.clear_qa_cache().await {
        Ok(removed) => Json(json!({"success": true, "removed": removed})).into_response(),
        Err(e) => {
            error!("Error clearing Q&A cache: {:#}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to clear cache")
        }
    }
}

async fn generate_coding_topics(
    State(state): State<AppState>,
    payload: Result<Json<SyllabusContentRequest>, JsonRejection>,
) -> Response {
    state.metrics.record_endpoint_request("/api/generate-coding-topics");

    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.content.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing required field: content");
    }

    match state.syllabus.generate_coding_topics(&request.content).await {
        Ok(object) => Json(object).into_response(),
        Err(e) => {
            error!("Error generating topics: {}", e);
            generation_error_response(e)
        }
    }
}

async fn generate_coding_problems(
    State(state): State<AppState>,
    payload: Result<Json<CodingProblemsRequest>, JsonRejection>,
) -> Response {
    state.metrics.record_endpoint_request("/api/generate-coding-problems");

    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(topic) = request.topic else {
        return error_json(StatusCode::BAD_REQUEST, "Missing required field: topic");
    };

    match state.syllabus.generate_coding_problems(&topic).await {
        Ok(object) => Json(object).into_response(),
        Err(e) => {
            error!("Error generating coding problems: {}", e);
            generation_error_response(e)
        }
    }
}

/// Unwrap a JSON body, turning axum's plain-text rejection into a 400 JSON error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            Err(error_json(StatusCode::BAD_REQUEST, &rejection.body_text()))
        }
    }
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

/// Map the final upstream error onto an HTTP response
fn generation_error_response(err: GenerationError) -> Response {
    if err.is_rate_limit() {
        let retry_after = err.retry_after_secs();
        let body = QuotaExceededResponse {
            error: err.to_string(),
            quota_exceeded: true,
            retry_after_seconds: retry_after,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        return response;
    }

    let status = match err {
        GenerationError::NoApiKeys => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use syllabus_gen::core::config::ApiConfig;
    use syllabus_gen::middleware::RetryPolicy;
    use syllabus_gen::services::syllabus::QuestionAnswer;
    use syllabus_gen::services::{GeminiClient, QaCache};

    const SECRET_A: &str = "AIzaSyA-first-secret-value";
    const SECRET_B: &str = "AIzaSyB-second-secret-value";

    fn test_state(keys: &[&str], cache_dir: &Path, clear_key: Option<&str>) -> AppState {
        let api = ApiConfig {
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            model: "gemini-2.0-flash".to_string(),
            // Nothing listens here; these tests never reach the upstream
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 1,
        };
        let metrics = Metrics::new();
        let rotator = Arc::new(KeyRotator::new(api.api_keys.clone()));
        let generation = Arc::new(GenerationService::new(
            Arc::clone(&rotator),
            GeminiClient::new(&api).unwrap(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
            metrics.clone(),
        ));
        let cache = QaCache::new(cache_dir.join("qas"), Duration::from_secs(3600), Some(metrics.clone()));
        let syllabus = Arc::new(SyllabusService::new(Arc::clone(&generation), cache));

        AppState {
            rotator,
            generation,
            syllabus,
            metrics,
            cache_clear_key: clear_key.map(Arc::from),
        }
    }

    async fn spawn_app(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn post_raw(base: &str, path: &str, body: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}{path}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn assert_json_error(response: reqwest::Response, status: u16) -> String {
        assert_eq!(response.status().as_u16(), status);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/json"), "got {content_type}");

        let body: serde_json::Value = response.json().await.unwrap();
        body["error"].as_str().expect("error message").to_string()
    }

    #[test]
    fn test_rate_limit_maps_to_429_with_retry_after() {
        let response = generation_error_response(GenerationError::RateLimited {
            status: 429,
            message: "quota".to_string(),
            retry_after_secs: Some(12),
        });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn test_rate_limit_without_hint_has_no_header() {
        let response = generation_error_response(GenerationError::Upstream {
            status: 429,
            message: "slow down".to_string(),
        });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_other_errors_map_to_server_errors() {
        let missing = generation_error_response(GenerationError::NoApiKeys);
        assert_eq!(missing.status(), StatusCode::SERVICE_UNAVAILABLE);

        let broken = generation_error_response(GenerationError::InvalidResponse("x".to_string()));
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_key_status_shape_without_secrets() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&[SECRET_A, SECRET_B], tmp.path(), None);
        state.rotator.mark_exhausted(SECRET_B);
        let base = spawn_app(state).await;

        let response = reqwest::get(format!("{base}/api/api-key-status")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let text = response.text().await.unwrap();

        assert!(!text.contains(SECRET_A));
        assert!(!text.contains(SECRET_B));
        assert!(!text.contains("AIza"));

        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["success"], true);
        assert!(body["timestamp"].is_string());

        let status = &body["status"];
        assert_eq!(status["totalKeys"], 2);
        assert_eq!(status["currentIndex"], 0);

        let key_states = status["keyStates"].as_array().unwrap();
        assert_eq!(key_states.len(), 2);
        assert_eq!(key_states[0]["keyIndex"], 1);
        assert_eq!(key_states[0]["isExhausted"], false);
        assert_eq!(key_states[1]["keyIndex"], 2);
        assert_eq!(key_states[1]["isExhausted"], true);
        assert_eq!(key_states[1]["consecutiveFailures"], 1);
        assert!(key_states[1]["exhaustedAt"].is_string());
        assert!(key_states[0].get("is_exhausted").is_none());
    }

    #[tokio::test]
    async fn test_generate_rejects_missing_or_empty_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn_app(test_state(&[SECRET_A], tmp.path(), None)).await;

        for body in [r#"{}"#, r#"{"schema":{}}"#, r#"{"prompt":""}"#, r#"{"prompt":"   "}"#] {
            let message = assert_json_error(post_raw(&base, "/api/generate", body).await, 400).await;
            assert_eq!(message, "Missing prompt", "body {body}");
        }

        // Unparseable bodies are a 400 JSON error too, not axum's plain-text rejection
        let message = assert_json_error(post_raw(&base, "/api/generate", r#"{"prompt":"#).await, 400).await;
        assert!(!message.is_empty());
        assert_json_error(post_raw(&base, "/api/generate", r#"{"prompt": 7}"#).await, 400).await;
    }

    #[tokio::test]
    async fn test_generate_without_keys_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn_app(test_state(&[], tmp.path(), None)).await;

        let response = post_raw(&base, "/api/generate", r#"{"prompt":"List sorting algorithms"}"#).await;
        let message = assert_json_error(response, 503).await;
        assert!(message.contains("No API keys"));
    }

    #[tokio::test]
    async fn test_syllabus_routes_validate_bodies() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn_app(test_state(&[SECRET_A], tmp.path(), None)).await;

        let cases = [
            ("/api/extract-topics", r#"{}"#, "Missing content"),
            ("/api/extract-topics", r#"{"content":""}"#, "Missing content"),
            ("/api/generate-topic-answers", r#"{"content":"syllabus"}"#, "Missing content or topic"),
            ("/api/generate-topic-answers", r#"{"topic":{"title":"Stacks"}}"#, "Missing content or topic"),
            ("/api/generate-coding-topics", r#"{}"#, "Missing required field: content"),
            ("/api/generate-coding-problems", r#"{}"#, "Missing required field: topic"),
        ];

        for (path, body, expected) in cases {
            let message = assert_json_error(post_raw(&base, path, body).await, 400).await;
            assert_eq!(message, expected, "{path} {body}");
        }
    }

    #[tokio::test]
    async fn test_topic_answers_served_from_cache() {
        let tmp = tempfile::tempdir().unwrap();
        // No keys: a cache miss would fail with 503
        let state = test_state(&[], tmp.path(), None);
        let qas = vec![QuestionAnswer {
            question: "What is a stack?".to_string(),
            answer: "A LIFO structure.".to_string(),
            unit_reference: None,
        }];
        state
            .syllabus
            .qa_cache()
            .put(&QaCache::generate_key("DSA syllabus", "Stacks"), &qas)
            .await
            .unwrap();
        let base = spawn_app(state).await;

        let response = post_raw(
            &base,
            "/api/generate-topic-answers",
            r#"{"content":"DSA syllabus","topic":{"title":"Stacks","key_points":["push","pop"]}}"#,
        )
        .await;
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["cached"], true);
        assert_eq!(body["questions_answers"][0]["question"], "What is a stack?");

        let miss = post_raw(
            &base,
            "/api/generate-topic-answers",
            r#"{"content":"DSA syllabus","topic":{"title":"Queues"}}"#,
        )
        .await;
        assert_json_error(miss, 503).await;
    }

    #[tokio::test]
    async fn test_clear_cache_requires_key_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&[], tmp.path(), Some("s3cret"));
        state
            .syllabus
            .qa_cache()
            .put("entry", &[])
            .await
            .unwrap();
        let base = spawn_app(state).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/api/clear-qas-cache");

        let missing = client.post(&url).send().await.unwrap();
        assert_eq!(assert_json_error(missing, 401).await, "Unauthorized");

        let wrong = client.post(&url).header(CACHE_CLEAR_HEADER, "guess").send().await.unwrap();
        assert_eq!(assert_json_error(wrong, 401).await, "Unauthorized");

        let allowed = client.post(&url).header(CACHE_CLEAR_HEADER, "s3cret").send().await.unwrap();
        assert_eq!(allowed.status().as_u16(), 200);
        let body: serde_json::Value = allowed.json().await.unwrap();
        assert_eq!(body, json!({"success": true, "removed": 1}));
    }

    #[tokio::test]
    async fn test_clear_cache_open_without_key() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn_app(test_state(&[], tmp.path(), None)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/clear-qas-cache"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["removed"], 0);
    }
}
