//! Delay strategy between reconnection attempts.

use std::time::Duration;

/// Exponential backoff: a fixed base doubled per attempt, capped.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before the given attempt (1-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        // The shift is clamped; the cap dominates well before 2^16.
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.cap)
    }
}
