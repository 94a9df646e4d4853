//! Restart delay policy for the player process

use std::time::Duration;

/// Exponential restart delay with a ceiling
///
/// Attempt 1 waits `initial`; every further attempt multiplies the previous
/// delay by `multiplier`, never exceeding `max`. With `multiplier >= 1.0` the
/// sequence is non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Delay before restart attempt `attempt` (1-based; 0 is treated as 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        let first = self.initial.min(self.max);
        if attempt <= 1 {
            return first;
        }

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}
