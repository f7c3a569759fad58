use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Repeat identifications of one person on one camera inside this window are
/// not notified again.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// Time source for dedup decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time (monotonic).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Shared between a test and its workers.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + offset
    }
}

/// Per-worker notification suppression.
///
/// In memory only. Each worker owns one; a new worker for the same camera starts
/// with an empty map.
#[derive(Debug, Default)]
pub struct Deduplicator {
    last_seen: HashMap<String, Instant>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and records nothing) when `entity_id` was notified less than
    /// `DEDUP_WINDOW` before `now`. Otherwise records `now` and returns true.
    pub fn should_notify(&mut self, entity_id: &str, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get(entity_id) {
            if now.saturating_duration_since(*last) < DEDUP_WINDOW {
                return false;
            }
        }
        self.last_seen.insert(entity_id.to_string(), now);
        true
    }

    /// Number of identities with a recorded notification.
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}
