//! Retry policy with jittered exponential backoff
//!
//! A logical fetch moves through `Attempting -> Waiting -> Attempting -> ...
//! -> Terminal`. The transition function is pure apart from the jitter draw,
//! so the attempt ceiling and the backoff schedule can be tested on their own.

use std::time::Duration;

use crate::config::RequestConfig;
use crate::outcome::FetchOutcome;
use crate::rate_limit::sample_between;

/// Backoff schedule bounded by `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    /// Upper bound before retry number `retry` (1-based):
    /// `min * 2^(retry-1)`, capped at `max`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.min.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay in `[min, ceiling(retry)]`.
    pub fn delay(&self, retry: u32) -> Duration {
        sample_between(self.min, self.ceiling(retry))
    }
}

/// State of one logical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// About to issue attempt number `n` (1-based)
    Attempting(u32),
    /// Sleeping before attempt `next_attempt`; `last` is the outcome being retried
    Waiting {
        next_attempt: u32,
        delay: Duration,
        last: FetchOutcome,
    },
    /// No further attempts; `attempts` were made in total
    Terminal { attempts: u32, outcome: FetchOutcome },
}

/// Attempt ceiling plus backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(request: &RequestConfig) -> Self {
        let (min, max) = request.delay_bounds();
        Self::new(request.retry_attempts, Backoff::new(min, max))
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Initial state: attempts are numbered from 1
    pub const fn start(&self) -> RetryState {
        RetryState::Attempting(1)
    }

    /// Transition after attempt `attempt` produced `outcome`.
    ///
    /// With `max_retries = n`, a fetch that keeps failing retryably makes
    /// exactly `n + 1` attempts.
    pub fn on_outcome(&self, attempt: u32, outcome: FetchOutcome) -> RetryState {
        if outcome.is_retryable() && attempt <= self.max_retries {
            RetryState::Waiting {
                next_attempt: attempt + 1,
                delay: self.backoff.delay(attempt),
                last: outcome,
            }
        } else {
            RetryState::Terminal {
                attempts: attempt,
                outcome,
            }
        }
    }
}
