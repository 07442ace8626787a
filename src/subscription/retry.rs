//! Reconnect policy: capped exponential backoff.

use std::time::Duration;

/// Backoff policy for one subscription channel.
///
/// Retry attempt `n` (zero-based `current_retries`) waits `base * 2^n`;
/// with the default one-second base that is 1 s, 2 s, 4 s. Once
/// `current_retries` reaches `max_retries` the subscription is abandoned
/// and no further timer is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum scheduled reconnects before abandoning.
    pub max_retries: u32,
    /// Delay of the first retry; doubles on each consecutive fault.
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Returns `true` if another reconnect may be scheduled.
    #[must_use]
    pub const fn allows(&self, current_retries: u32) -> bool {
        current_retries < self.max_retries
    }

    /// Backoff delay for the given zero-based retry counter.
    #[must_use]
    pub fn delay(&self, current_retries: u32) -> Duration {
        self.base * 2_u32.saturating_pow(current_retries)
    }
}
