// Trailing-edge debounce driven by caller timestamps.
// wasm32 has no monotonic Instant, so the event loop passes `performance.now()` in.

use crate::types::Millis;

/// Holds the latest triggered value until input has been quiet for `delay_ms`.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay_ms: u64,
    pending: Option<(T, Millis)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay_ms: u64) -> Self {
        Debouncer {
            delay_ms,
            pending: None,
        }
    }

    /// Replace any pending value and restart the settle timer.
    pub fn trigger(&mut self, value: T, now: Millis) {
        self.pending = Some((value, now));
    }

    /// Time at which the pending value becomes due, if any.
    pub fn due_at(&self) -> Option<Millis> {
        self.pending
            .as_ref()
            .map(|(_, at)| at.saturating_add(self.delay_ms))
    }

    /// Take the pending value once the settle period has elapsed.
    pub fn poll(&mut self, now: Millis) -> Option<T> {
        match self.due_at() {
            Some(due) if now >= due => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Take the pending value without waiting.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
