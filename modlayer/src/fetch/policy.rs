//! Retry policy for blob transfers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts per blob.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial delay for exponential backoff (250ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 250;

/// Default maximum delay for exponential backoff (10 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 10;

/// How a transfer handles transient failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Single attempt.
    None,

    /// Fixed delay between attempts. A zero delay retries immediately, so
    /// the only spacing is the latency of the failed attempt itself.
    Fixed { max_attempts: u32, delay: Duration },

    /// Exponential backoff between attempts.
    ExponentialBackoff {
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Retry right away, up to `max_attempts` total attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::Fixed {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    /// Exponential backoff with default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }

    /// Total attempts allowed, never less than one.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::ExponentialBackoff { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay, .. } => *delay,
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                ..
            } => {
                let factor = 2u32.saturating_pow(attempt - 2);
                initial_delay.saturating_mul(factor).min(*max_delay)
            }
        }
    }
}
