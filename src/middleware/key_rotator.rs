// Round-robin API key rotator with exhaustion tracking and lazy cooldown
//
// Hands out keys in configured order, skips keys the upstream has rate-limited,
// and lets them back in once the cooldown window has passed.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// How long an exhausted key stays out of rotation
pub const EXHAUSTION_COOLDOWN_SECS: i64 = 60 * 60;

fn exhaustion_cooldown() -> Duration {
    Duration::seconds(EXHAUSTION_COOLDOWN_SECS)
}

/// One configured key and its usage state.
///
/// `exhausted_at` doubles as the exhaustion flag, so an exhausted slot always
/// has a timestamp and a usable one never does.
struct KeySlot {
    key: String,
    last_used_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    exhausted_at: Option<DateTime<Utc>>,
}

impl KeySlot {
    fn new(key: String) -> Self {
        Self {
            key,
            last_used_at: None,
            consecutive_failures: 0,
            exhausted_at: None,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted_at.is_some()
    }

    fn cooled_down(&self, now: DateTime<Utc>) -> bool {
        match self.exhausted_at {
            Some(at) => now - at > exhaustion_cooldown(),
            None => false,
        }
    }

    fn recover(&mut self) {
        self.exhausted_at = None;
        self.consecutive_failures = 0;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        // Never move backwards if the wall clock does
        self.last_used_at = Some(match self.last_used_at {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }
}

impl fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySlot")
            .field("key", &mask_key(&self.key))
            .field("last_used_at", &self.last_used_at)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("exhausted_at", &self.exhausted_at)
            .finish()
    }
}

#[derive(Debug)]
struct RotatorState {
    slots: Vec<KeySlot>,
    cursor: usize,
}

/// A key handed out by [`KeyRotator::next_key`]
#[derive(Clone, PartialEq, Eq)]
pub struct KeySelection {
    pub key: String,
    /// Zero-based position in the configured order
    pub index: usize,
    /// Every key was exhausted and this one was returned anyway
    pub degraded: bool,
}

impl fmt::Debug for KeySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySelection")
            .field("key", &mask_key(&self.key))
            .field("index", &self.index)
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Diagnostic view of a single key. Never carries the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySlotStatus {
    /// One-based position in the configured order
    pub key_index: usize,
    pub is_exhausted: bool,
    pub consecutive_failures: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub exhausted_at: Option<DateTime<Utc>>,
}

/// Diagnostic snapshot of the whole rotator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatorStatus {
    pub total_keys: usize,
    pub current_index: usize,
    pub key_states: Vec<KeySlotStatus>,
}

/// Rotating pool of upstream API keys
///
/// Keys keep their configured order for the lifetime of the process. Selection
/// resumes from an internal cursor so consecutive calls spread across the pool.
/// Exhausted keys are skipped until [`EXHAUSTION_COOLDOWN_SECS`] have passed;
/// recovery is checked lazily on the next selection, there is no timer.
///
/// All operations are synchronous and never block on I/O, so the state sits
/// behind a plain mutex and the rotator can be shared as `Arc<KeyRotator>`.
#[derive(Debug)]
pub struct KeyRotator {
    state: Mutex<RotatorState>,
}

impl KeyRotator {
    /// Build the pool from an ordered key list.
    ///
    /// The list is expected to be cleaned by config loading already. An empty
    /// list gives a pool that never hands out a key.
    pub fn new(keys: Vec<String>) -> Self {
        let slots: Vec<KeySlot> = keys.into_iter().map(KeySlot::new).collect();

        if slots.is_empty() {
            warn!("Key rotator initialized with no API keys");
        } else {
            info!("Key rotator initialized with {} API keys", slots.len());
        }

        Self {
            state: Mutex::new(RotatorState { slots, cursor: 0 }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the key for the next upstream call.
    ///
    /// Returns `None` only when no keys are configured. When every key is
    /// exhausted the key at the cursor is returned with `degraded` set and the
    /// caller should expect the upstream to reject it again.
    pub fn next_key(&self) -> Option<KeySelection> {
        self.next_key_at(Utc::now())
    }

    pub(crate) fn next_key_at(&self, now: DateTime<Utc>) -> Option<KeySelection> {
        let mut state = self.state.lock();
        let total = state.slots.len();
        if total == 0 {
            return None;
        }

        for (i, slot) in state.slots.iter_mut().enumerate() {
            if slot.cooled_down(now) {
                info!("Re-enabling API key {} after cooldown period", i + 1);
                slot.recover();
            }
        }

        let start = state.cursor;
        for offset in 0..total {
            let index = (start + offset) % total;
            let slot = &mut state.slots[index];
            if slot.is_exhausted() {
                continue;
            }

            slot.touch(now);
            let key = slot.key.clone();
            state.cursor = (index + 1) % total;
            debug!("Using API key {}/{}", index + 1, total);
            return Some(KeySelection {
                key,
                index,
                degraded: false,
            });
        }

        warn!(
            "All {} API keys are exhausted, using key {} anyway",
            total,
            start + 1
        );
        let slot = &mut state.slots[start];
        slot.touch(now);
        Some(KeySelection {
            key: slot.key.clone(),
            index: start,
            degraded: true,
        })
    }

    /// Take a key out of rotation after the upstream rate-limited it.
    ///
    /// Unknown keys are ignored, so a stale value from an earlier request is
    /// safe to pass.
    pub fn mark_exhausted(&self, key: &str) {
        self.mark_exhausted_at(key, Utc::now())
    }

    pub(crate) fn mark_exhausted_at(&self, key: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        let Some(index) = state.slots.iter().position(|s| s.key == key) else {
            debug!("Ignoring exhaustion report for unknown key {}", mask_key(key));
            return;
        };

        let slot = &mut state.slots[index];
        slot.exhausted_at = Some(now);
        slot.consecutive_failures += 1;

        warn!(
            "API key {} marked as exhausted (failure {})",
            index + 1,
            slot.consecutive_failures
        );
    }

    /// Snapshot for diagnostics. Pure read.
    pub fn status(&self) -> RotatorStatus {
        let state = self.state.lock();
        RotatorStatus {
            total_keys: state.slots.len(),
            current_index: state.cursor,
            key_states: state
                .slots
                .iter()
                .enumerate()
                .map(|(i, slot)| KeySlotStatus {
                    key_index: i + 1,
                    is_exhausted: slot.is_exhausted(),
                    consecutive_failures: slot.consecutive_failures,
                    last_used_at: slot.last_used_at,
                    exhausted_at: slot.exhausted_at,
                })
                .collect(),
        }
    }

    /// Number of keys currently out of rotation
    pub fn exhausted_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.is_exhausted())
            .count()
    }
}

/// Short, log-safe form of a key: first and last four characters
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
