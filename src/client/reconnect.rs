//! Reconnect backoff.
//!
//! delay(attempt) = min(base * 2^(attempt-1), max_delay), attempts counted
//! from 1. The counter resets on a successful connect and on a manual retry.

use std::time::Duration;

/// Exponential backoff counter used by the connection manager.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            attempt: 0,
        }
    }

    /// Count another attempt and return it with its delay.
    pub fn next_attempt(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        (self.attempt, self.delay_for(self.attempt))
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
