pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, GenerationError, GenerationResult};
pub use types::{GenerationRequest, GenerationResponse, KeyStatusResponse, QuotaExceededResponse};
