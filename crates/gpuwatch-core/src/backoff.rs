use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(3_000);
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Deterministic exponential backoff: `min(base * growth^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub growth: f64,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            growth: DEFAULT_GROWTH_FACTOR,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_ms = self.base.as_secs_f64() * 1_000.0 * self.growth.powi(exponent);
        let max_ms = self.max.as_secs_f64() * 1_000.0;
        if !scaled_ms.is_finite() || scaled_ms >= max_ms {
            return self.max;
        }
        Duration::from_millis(scaled_ms.round() as u64).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
}

impl ReconnectState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt; counts the attempt.
    pub fn next_delay(&mut self, policy: &ReconnectPolicy) -> Duration {
        let delay = policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
