// Translation of upstream HTTP failures into GenerationError
//
// Gemini reports quota problems in a few places: the status code, the
// `error.status` field, the message text, and a RetryInfo detail carrying the
// suggested wait. All of them are checked here so callers only see one shape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::core::errors::{message_signals_rate_limit, GenerationError};

static SECONDS_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(?:\.\d+)?s").expect("valid seconds regex"));

static RETRY_DELAY_IN_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"retryDelay"?\s*:\s*"?(\d+)(?:\.\d+)?s"#).expect("valid retryDelay regex")
});

/// Parse a retry hint such as `"9s"`, `"1.5s"` or `"12"` into whole seconds
pub fn parse_retry_seconds(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(caps) = SECONDS_SUFFIX.captures(raw) {
        return caps[1].parse().ok();
    }

    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| n.max(0.0).floor() as u64)
}

/// Find the retry hint inside a Google API error body.
///
/// Looks at `error.details[*].retryDelay`, preferring `RetryInfo` entries,
/// then falls back to a `retryDelay":"Ns"` fragment inside `error.message`.
pub fn retry_after_from_body(body: &Value) -> Option<u64> {
    let error = &body["error"];

    if let Some(details) = error["details"].as_array() {
        let from_retry_info = details
            .iter()
            .filter(|d| {
                d["@type"]
                    .as_str()
                    .is_some_and(|t| t.contains("RetryInfo"))
            })
            .find_map(|d| d["retryDelay"].as_str().and_then(parse_retry_seconds));

        let any_delay = || {
            details
                .iter()
                .find_map(|d| d["retryDelay"].as_str().and_then(parse_retry_seconds))
        };

        if let Some(secs) = from_retry_info.or_else(any_delay) {
            return Some(secs);
        }
    }

    error["message"]
        .as_str()
        .and_then(|m| RETRY_DELAY_IN_MESSAGE.captures(m))
        .and_then(|caps| caps[1].parse().ok())
}

/// Build the error for a non-success upstream response
pub fn translate_http_error(
    status: u16,
    retry_after_header: Option<&str>,
    body: &str,
) -> GenerationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.to_string()
            }
        });

    let resource_exhausted = parsed
        .as_ref()
        .and_then(|v| v["error"]["status"].as_str())
        .is_some_and(|s| s == "RESOURCE_EXHAUSTED");

    let is_rate_limit =
        status == 429 || resource_exhausted || message_signals_rate_limit(&message);

    if !is_rate_limit {
        return GenerationError::Upstream { status, message };
    }

    let retry_after_secs = retry_after_header
        .and_then(parse_retry_seconds)
        .or_else(|| parsed.as_ref().and_then(retry_after_from_body));

    GenerationError::RateLimited {
        status,
        message,
        retry_after_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_retry_seconds() {
        assert_eq!(parse_retry_seconds("9s"), Some(9));
        assert_eq!(parse_retry_seconds("37.25s"), Some(37));
        assert_eq!(parse_retry_seconds("12"), Some(12));
        assert_eq!(parse_retry_seconds("4.9"), Some(4));
        assert_eq!(parse_retry_seconds("-3"), Some(0));
        assert_eq!(parse_retry_seconds("soon"), None);
        assert_eq!(parse_retry_seconds(""), None);
    }

    #[test]
    fn test_retry_info_detail_preferred() {
        let body = json!({
            "error": {
                "code": 429,
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.Help", "retryDelay": "99s"},
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "9s"}
                ]
            }
        });
        assert_eq!(retry_after_from_body(&body), Some(9));
    }

    #[test]
    fn test_retry_delay_without_retry_info() {
        let body = json!({"error": {"details": [{"retryDelay": "21s"}]}});
        assert_eq!(retry_after_from_body(&body), Some(21));
    }

    #[test]
    fn test_retry_delay_in_message() {
        let body = json!({"error": {"message": "quota hit {\"retryDelay\": \"14s\"}"}});
        assert_eq!(retry_after_from_body(&body), Some(14));

        let nothing = json!({"error": {"message": "plain failure"}});
        assert_eq!(retry_after_from_body(&nothing), None);
    }

    #[test]
    fn test_translate_429_with_header() {
        let err = translate_http_error(429, Some("30"), "{}");
        match err {
            GenerationError::RateLimited {
                status,
                retry_after_secs,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after_secs, Some(30));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_translate_resource_exhausted_body() {
        let body = json!({
            "error": {
                "code": 429,
                "message": "You exceeded your current quota.",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "9s"}]
            }
        })
        .to_string();

        let err = translate_http_error(403, None, &body);
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after_secs(), Some(9));
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("You exceeded your current quota."));
    }

    #[test]
    fn test_translate_plain_server_error() {
        let err = translate_http_error(500, None, "upstream exploded");
        match err {
            GenerationError::Upstream { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }

        let empty = translate_http_error(502, None, "");
        assert_eq!(empty.to_string(), "Upstream request failed (502): HTTP 502");
    }
}
