//! Retry policy with configurable backoff.
//!
//! A [`RetryPolicy`] is a pure function of (outcome, attempt count): it holds
//! no state between calls and never sleeps itself. The runner does the
//! waiting.
//!
//! Only a `RetryableFailure` outcome is ever retried. The stage chose that
//! variant; the policy decides when those retries stop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::StageOutcome;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base
    #[default]
    Fixed,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Decides whether and when a failed attempt is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Three attempts, five minutes apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(3600),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy with the default schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Delay to wait after the given 1-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Decides what follows a failed attempt.
    ///
    /// `attempt` is the 1-based number of the attempt that produced
    /// `outcome`. The cause kind is not consulted: a `FatalFailure` stops
    /// even with a transient cause.
    #[must_use]
    pub fn decide(&self, outcome: &StageOutcome, attempt: u32) -> RetryDecision {
        if !outcome.is_retryable() {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            next_attempt: attempt + 1,
        }
    }
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The outcome was not a `RetryableFailure`.
    NotRetryable,
    /// Every allowed attempt was used.
    Exhausted,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run attempt `next_attempt`.
    Retry {
        /// Time to wait before the next attempt.
        delay: Duration,
        /// The 1-based number of the next attempt.
        next_attempt: u32,
    },
    /// Stop; the last outcome stands.
    GiveUp(GiveUpReason),
}
