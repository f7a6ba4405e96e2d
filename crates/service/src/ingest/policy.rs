//! Retry policy for failed persistence attempts.

use std::num::NonZeroU32;
use std::time::Duration;

/// How many times a message is offered to the store, and how long to wait
/// between attempts.
///
/// The default makes a single attempt, so a failed message goes straight to
/// the dead-letter sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.get()
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}
