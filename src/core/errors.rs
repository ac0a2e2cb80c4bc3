// Error types for configuration and upstream generation
//
// Using thiserror for ergonomic error definitions with:
// - Type-safe error matching
// - Automatic Display/Error trait implementations
// - The upstream status and message carried through retries untouched

use thiserror::Error;

/// Generation errors surfaced by the upstream client and the retry loop
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No API keys configured (set GOOGLE_GENERATIVE_AI_API_KEY)")]
    NoApiKeys,

    #[error("Rate limit exceeded ({status}): {message}")]
    RateLimited {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Upstream request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Whether this failure carries a rate-limit or quota signature.
    ///
    /// Matches HTTP 429 and any message mentioning a quota, a rate limit or
    /// `RESOURCE_EXHAUSTED`, whatever variant it arrived in.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            GenerationError::RateLimited { .. } => true,
            GenerationError::Upstream { status: 429, .. } => true,
            GenerationError::Http(e) if e.status().map(|s| s.as_u16()) == Some(429) => true,
            GenerationError::NoApiKeys => false,
            other => message_signals_rate_limit(&other.to_string()),
        }
    }

    /// Retry hint in seconds, when the upstream supplied one
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GenerationError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// HTTP status reported by the upstream, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::RateLimited { status, .. } | GenerationError::Upstream { status, .. } => {
                Some(*status)
            }
            GenerationError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub(crate) fn message_signals_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("resource_exhausted")
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid retry config: {0}")]
    InvalidRetryConfig(String),

    #[error("Invalid API config: {0}")]
    InvalidApiConfig(String),

    #[error("Invalid cache path: {0}")]
    InvalidCachePath(String),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
