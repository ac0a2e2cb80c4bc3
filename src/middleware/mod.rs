// Middleware for resilient upstream calls
//
// Provides API key rotation with cooldown and the retry loop built on it

pub mod key_rotator;
pub mod retry;

// Re-export commonly used types
pub use key_rotator::{KeyRotator, KeySelection, KeySlotStatus, RotatorStatus};
pub use retry::{with_key_rotation, with_key_rotation_observed, RetryObserver, RetryPolicy};
