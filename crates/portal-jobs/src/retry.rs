//! Backoff policies for automatic job retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Delay strategy between automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every attempt.
    Exponential,
}

/// Backoff policy stored with each job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Delay before the first retry in milliseconds.
    pub delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Random spread applied to the delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(5))
    }
}

impl BackoffPolicy {
    /// Fixed delay, no jitter.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        let delay_ms = duration_ms(delay);
        Self {
            strategy: BackoffStrategy::Fixed,
            delay_ms,
            max_delay_ms: delay_ms,
            jitter: 0.0,
        }
    }

    /// Exponential backoff starting at `initial`, capped at one hour.
    #[must_use]
    pub fn exponential(initial: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            delay_ms: duration_ms(initial),
            max_delay_ms: 3_600_000,
            jitter: 0.1,
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(delay);
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the retry that follows `attempt` (1-based) failing.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = match self.strategy {
            BackoffStrategy::Fixed => self.delay_ms,
            BackoffStrategy::Exponential => {
                let exp = (attempt - 1).min(32);
                self.delay_ms.saturating_mul(1u64 << exp)
            }
        };
        let capped = base.min(self.max_delay_ms);

        let jittered = if self.jitter > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let range = (capped as f64 * self.jitter.clamp(0.0, 1.0)) as u64;
            if range == 0 {
                capped
            } else {
                let offset = (Uuid::new_v4().as_u128() % u128::from(range)) as u64;
                capped.saturating_sub(range / 2).saturating_add(offset)
            }
        } else {
            capped
        };

        Duration::from_millis(jittered)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
