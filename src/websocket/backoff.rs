use std::time::Duration;

/// Capped exponential backoff: `min(2^attempt * base, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait before the retry that follows failure number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// The attempt counter after one more failure.
    ///
    /// The counter stops growing once the delay has reached the cap, so long
    /// outages never overflow it.
    pub fn next_attempt(&self, attempt: u32) -> u32 {
        if self.delay(attempt) >= self.max {
            attempt
        } else {
            attempt + 1
        }
    }
}
