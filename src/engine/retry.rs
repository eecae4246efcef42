use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Retry on the very next sweep.
    #[default]
    None,

    Fixed,

    Exponential,
}

impl BackoffStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "fixed" => Some(Self::Fixed),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Decides when a step whose dispatch failed is tried again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::None,
            initial_delay: Duration::seconds(60),
            max_delay: Duration::seconds(3600),
        }
    }
}

impl RetryPolicy {
    /// New `next_scheduled_at` after the `attempt`-th consecutive failure, or
    /// `None` to leave the schedule untouched.
    pub fn retry_at(&self, now: DateTime<Utc>, attempt: i32) -> Option<DateTime<Utc>> {
        match self.backoff {
            BackoffStrategy::None => None,
            _ => Some(
                now.checked_add_signed(self.calculate_delay(attempt.max(1) as u32))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay;

        let delay = match self.backoff {
            BackoffStrategy::None => Duration::zero(),
            BackoffStrategy::Fixed => base_delay,
            BackoffStrategy::Exponential => {
                let multiplier = 2i32.saturating_pow(attempt.saturating_sub(1).min(30));
                base_delay.checked_mul(multiplier).unwrap_or(self.max_delay)
            }
        };

        delay.min(self.max_delay)
    }
}
