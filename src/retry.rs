//! Retry schedule for detector initialization.

use std::time::Duration;

/// Delay before the first retry (500 milliseconds).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Longest wait between two initialization attempts (8 seconds).
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Overall budget for detector initialization (3 minutes).
pub const DEFAULT_INIT_DEADLINE: Duration = Duration::from_secs(180);

/// Doubling delay between initialization attempts.
///
/// Each step waits `base * 2^attempt` plus a quarter of that step as settle
/// time for a mirror that was just switched to, bounded by `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Wait before retrying after the zero-based `attempt` failed.
    ///
    /// Never longer than `remaining`, so the last retry still lands inside
    /// the deadline.
    pub fn delay(&self, attempt: u32, remaining: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let step = self.base.checked_mul(factor).unwrap_or(self.max);
        step.saturating_add(step / 4).min(self.max).min(remaining)
    }
}
