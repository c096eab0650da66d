//! Retry bounds and backoff for transfer requests.

use std::time::Duration;

/// How many times a failed operation may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    Limited(u32),
    Unlimited,
}

impl Attempts {
    /// Maps the classic signed count, where any negative value means unlimited.
    pub fn from_signed(n: i64) -> Self {
        if n < 0 {
            Attempts::Unlimited
        } else {
            Attempts::Limited(n.min(u32::MAX as i64) as u32)
        }
    }

    /// Returns `true` if another retry is allowed after `done` retries.
    pub fn allows(&self, done: u32) -> bool {
        match self {
            Attempts::Limited(max) => done < *max,
            Attempts::Unlimited => true,
        }
    }
}

/// Retry policy: attempt bound plus delay with exponential backoff.
///
/// A policy without a delay is disabled and errors propagate immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: Attempts,
    /// Delay before the first retry. `None` disables retrying.
    pub delay: Option<Duration>,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Attempts::Limited(3),
            delay: Some(Duration::from_secs(1)),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            attempts: Attempts::Limited(0),
            delay: None,
            ..Default::default()
        }
    }

    /// Builds a policy from a signed millisecond delay; negative disables it.
    pub fn from_millis(attempts: Attempts, delay_ms: i64) -> Self {
        Self {
            attempts,
            delay: u64::try_from(delay_ms).ok().map(Duration::from_millis),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.delay.is_some() && self.attempts.allows(0)
    }

    /// Returns `true` if retry number `done + 1` may run.
    pub fn should_retry(&self, done: u32) -> bool {
        self.delay.is_some() && self.attempts.allows(done)
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(base) = self.delay else {
            return Duration::ZERO;
        };
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = base.as_millis() as f64 * self.backoff_factor.max(1.0).powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}
