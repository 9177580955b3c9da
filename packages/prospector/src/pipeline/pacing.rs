//! Randomized delays between external calls.

use std::time::Duration;

use rand::Rng;

/// Jitter bounds for the pause between consecutive source/delivery calls.
#[derive(Debug, Clone, Copy)]
pub struct PacingPolicy {
    min: Duration,
    max: Duration,
}

impl PacingPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// Zero-width policy for tests.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Sleep for a uniformly random duration inside the bounds.
    pub async fn pause(&self) {
        if self.max.is_zero() {
            return;
        }
        let delay = if self.min == self.max {
            self.min
        } else {
            rand::rng().random_range(self.min..=self.max)
        };
        tokio::time::sleep(delay).await;
    }
}
