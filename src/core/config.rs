use crate::core::errors::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};
use tracing::Level;

/// Primary credential variable; numbered fallbacks append `_1`..`_6`
pub const API_KEY_VAR: &str = "GOOGLE_GENERATIVE_AI_API_KEY";
const FALLBACK_KEY_COUNT: usize = 6;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Upstream API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

/// Caller-side retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Generated Q&A cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: String,
    pub qas_ttl_seconds: u64,
    /// When set, clearing the cache requires a matching `x-cache-clear-key` header
    pub clear_key: Option<String>,
}

impl CacheConfig {
    pub fn qas_dir(&self) -> PathBuf {
        Path::new(&self.cache_dir).join("qas")
    }
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> ConfigResult<Self> {
        let api_keys = collect_api_keys(|name| env::var(name).ok());

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::INFO);

        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::EnvVarError(format!("SERVER_PORT is not a port: {raw}")))?,
            Err(_) => 3000,
        };

        Ok(Self {
            server: ServerConfig {
                port,
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            api: ApiConfig {
                api_keys,
                model: env::var("GENERATION_MODEL")
                    .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
                base_url: env::var("GENERATION_BASE_URL")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
                timeout_seconds: env::var("API_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
            retry: RetryConfig {
                max_attempts: env::var("GENERATION_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                retry_delay_ms: env::var("GENERATION_RETRY_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            },
            cache: CacheConfig {
                cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| ".cache".to_string()),
                qas_ttl_seconds: env::var("QAS_CACHE_TTL_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7 * 24 * 3600),
                clear_key: env::var("CACHE_CLEAR_KEY")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        // An empty key list is allowed here: the server starts and reports
        // the problem on every generation request instead.

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryConfig(
                "max_attempts must be >= 1".to_string(),
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::InvalidApiConfig(
                "timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.api.model.trim().is_empty() {
            return Err(ConfigError::InvalidApiConfig(
                "model name must not be empty".to_string(),
            ));
        }

        if self.cache.cache_dir.trim().is_empty() {
            return Err(ConfigError::InvalidCachePath(
                "cache_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn api_keys(&self) -> &[String] {
        &self.api.api_keys
    }

    pub fn model(&self) -> &str {
        &self.api.model
    }

    pub fn cache_clear_key(&self) -> Option<&str> {
        self.cache.clear_key.as_deref()
    }
}

/// Build the ordered credential list from the primary variable and its
/// numbered fallbacks. Blank values and repeats are dropped, first one wins.
pub fn collect_api_keys<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let names = std::iter::once(API_KEY_VAR.to_string())
        .chain((1..=FALLBACK_KEY_COUNT).map(|i| format!("{API_KEY_VAR}_{i}")));

    let mut keys: Vec<String> = Vec::new();
    for name in names {
        let Some(raw) = lookup(&name) else { continue };
        let key = raw.trim();
        if key.is_empty() || keys.iter().any(|k| k == key) {
            continue;
        }
        keys.push(key.to_string());
    }
    keys
}

fn parse_level(raw: &str) -> Option<Level> {
    match raw.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}
