// Retry loop for upstream calls that draw their key from the rotator

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::RetryConfig;
use crate::core::errors::{GenerationError, GenerationResult};
use crate::middleware::key_rotator::{KeyRotator, KeySelection};

/// Attempt budget and spacing for one logical upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Outcome hooks for callers that want to count what the loop did
pub trait RetryObserver: Send + Sync {
    fn on_selection(&self, _selection: &KeySelection) {}
    fn on_key_exhausted(&self, _selection: &KeySelection) {}
}

impl RetryObserver for () {}

/// Run `op` with a fresh key per attempt until it succeeds or the budget runs out.
///
/// Every failure is retried after `policy.delay`. Only a rate-limit failure on
/// the final attempt takes its key out of rotation; earlier failures are
/// treated as transient. The last error is returned as the upstream produced it.
pub async fn with_key_rotation<T, F, Fut>(
    rotator: &KeyRotator,
    policy: &RetryPolicy,
    op: F,
) -> GenerationResult<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = GenerationResult<T>>,
{
    with_key_rotation_observed(rotator, policy, &(), op).await
}

pub async fn with_key_rotation_observed<T, F, Fut, O>(
    rotator: &KeyRotator,
    policy: &RetryPolicy,
    observer: &O,
    mut op: F,
) -> GenerationResult<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = GenerationResult<T>>,
    O: RetryObserver + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let Some(selection) = rotator.next_key() else {
            return Err(GenerationError::NoApiKeys);
        };
        observer.on_selection(&selection);

        if attempt > 1 {
            debug!(
                "Retrying with API key {} (attempt {}/{})",
                selection.index + 1,
                attempt,
                max_attempts
            );
        }

        let err = match op(selection.key.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt == max_attempts {
            if err.is_rate_limit() {
                rotator.mark_exhausted(&selection.key);
                observer.on_key_exhausted(&selection);
            }
            warn!(
                "Generation failed after {} attempts (last key {}): {}",
                max_attempts,
                selection.index + 1,
                err
            );
            return Err(err);
        }

        debug!(
            "Attempt {}/{} with API key {} failed{}: {}",
            attempt,
            max_attempts,
            selection.index + 1,
            if err.is_rate_limit() { " (rate limit)" } else { "" },
            err
        );
        tokio::time::sleep(policy.delay).await;
    }

    unreachable!("retry loop always returns on its final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rotator(keys: &[&str]) -> KeyRotator {
        KeyRotator::new(keys.iter().map(|k| k.to_string()).collect())
    }

    fn rate_limited() -> GenerationError {
        GenerationError::RateLimited {
            status: 429,
            message: "Resource has been exhausted (e.g. check quota).".to_string(),
            retry_after_secs: Some(9),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let r = rotator(&["A", "B"]);
        let result = with_key_rotation(&r, &RetryPolicy::default(), |key| async move {
            Ok::<_, GenerationError>(format!("used {key}"))
        })
        .await
        .unwrap();

        assert_eq!(result, "used A");
        assert_eq!(r.exhausted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_across_keys_then_succeeds() {
        let r = rotator(&["A", "B", "C"]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let result = with_key_rotation(&r, &RetryPolicy::default(), |key| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(key.clone());
                if key == "C" {
                    Ok(42)
                } else {
                    Err(rate_limited())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(*seen.lock(), vec!["A", "B", "C"]);
        // Earlier rate limits do not blacklist anything
        assert_eq!(r.exhausted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_final_rate_limit_marks_exhausted() {
        let r = rotator(&["A", "B", "C", "D"]);

        let err = with_key_rotation(&r, &RetryPolicy::default(), |_key| async move {
            Err::<(), _>(rate_limited())
        })
        .await
        .unwrap_err();

        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after_secs(), Some(9));

        let status = r.status();
        assert!(!status.key_states[0].is_exhausted);
        assert!(!status.key_states[1].is_exhausted);
        assert!(status.key_states[2].is_exhausted);
        assert!(!status.key_states[3].is_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_does_not_mark() {
        let r = rotator(&["A", "B"]);
        let calls = AtomicUsize::new(0);

        let err = with_key_rotation(&r, &RetryPolicy::default(), |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<(), _>(GenerationError::Upstream {
                    status: 500,
                    message: "backend error".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, GenerationError::Upstream { status: 500, .. }));
        assert_eq!(r.exhausted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts_only() {
        let r = rotator(&["A"]);
        let start = tokio::time::Instant::now();

        let _ = with_key_rotation(&r, &RetryPolicy::default(), |_key| async move {
            Err::<(), _>(GenerationError::InvalidResponse("nope".to_string()))
        })
        .await;

        // Two gaps of 500ms for three attempts, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_empty_pool_fails_fast() {
        let r = KeyRotator::new(Vec::new());
        let err = with_key_rotation(&r, &RetryPolicy::default(), |_key| async move {
            Ok::<_, GenerationError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GenerationError::NoApiKeys));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_selections_and_exhaustion() {
        #[derive(Default)]
        struct Counting {
            selections: AtomicUsize,
            exhausted: AtomicUsize,
        }

        impl RetryObserver for Counting {
            fn on_selection(&self, _selection: &KeySelection) {
                self.selections.fetch_add(1, Ordering::SeqCst);
            }
            fn on_key_exhausted(&self, _selection: &KeySelection) {
                self.exhausted.fetch_add(1, Ordering::SeqCst);
            }
        }

        let r = rotator(&["A", "B"]);
        let observer = Counting::default();
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        };

        let _ = with_key_rotation_observed(&r, &policy, &observer, |_key| async move {
            Err::<(), _>(rate_limited())
        })
        .await;

        assert_eq!(observer.selections.load(Ordering::SeqCst), 2);
        assert_eq!(observer.exhausted.load(Ordering::SeqCst), 1);
        assert!(r.status().key_states[1].is_exhausted);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            retry_delay_ms: 250,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
