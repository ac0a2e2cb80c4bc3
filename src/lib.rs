// Library exports for the syllabus generation backend
//
// Key rotation and retry live in `middleware`; the upstream client and the
// syllabus operations built on it live in `services`

// Core modules
pub mod core;
pub mod middleware;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use self::core::{
    config::Config,
    errors::{ConfigError, GenerationError, GenerationResult},
    types::{GenerationRequest, GenerationResponse, KeyStatusResponse, QuotaExceededResponse},
};

pub use middleware::{with_key_rotation, KeyRotator, KeySelection, RetryPolicy, RotatorStatus};

pub use services::{GeminiClient, GenerationService, QaCache, SyllabusService};

pub use utils::Metrics;
