//! Retry policy: a pure function from a failure and the attempts so far to
//! the next action. Execution (sleeping, re-conditioning, resubmitting)
//! belongs to the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Per-item attempt counters. Every counter only ever increases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts {
    /// Total submissions to the service.
    pub submissions: u32,
    /// Rate-limit failures seen.
    pub rate_limited: u32,
    /// Transient network failures seen.
    pub network: u32,
    /// Repairs performed.
    pub repairs: u32,
}

impl Attempts {
    /// Count a classified failure against its cause.
    pub fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::RateLimited => self.rate_limited += 1,
            FailureKind::TransientNetwork => self.network += 1,
            FailureKind::PayloadTooLarge
            | FailureKind::DimensionExceeded
            | FailureKind::AuthError
            | FailureKind::Unclassified
            | FailureKind::Unrepairable => {}
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait, then resubmit the same payload.
    Retry(Duration),
    /// Re-condition with tighter limits, then resubmit.
    Repair,
    /// Record a terminal failure.
    GiveUp,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Retries allowed for rate-limit failures.
    pub max_rate_limit_retries: u32,
    /// Retries allowed for transient network failures.
    pub max_network_retries: u32,
    /// Repairs allowed for size/dimension failures.
    pub max_repairs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_rate_limit_retries: 3,
            max_network_retries: 3,
            max_repairs: 1,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay for the n-th failure of a cause.
    /// delay = base_delay * 2^(n - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(2u32.pow(exponent))
    }

    /// Decide the next action for a failure of `kind`.
    ///
    /// `attempts` must already include this failure (see [`Attempts::record`]).
    pub fn decide(&self, kind: FailureKind, attempts: &Attempts) -> Decision {
        match kind {
            FailureKind::RateLimited => {
                self.backoff(attempts.rate_limited, self.max_rate_limit_retries)
            }
            FailureKind::TransientNetwork => {
                self.backoff(attempts.network, self.max_network_retries)
            }
            FailureKind::PayloadTooLarge | FailureKind::DimensionExceeded => {
                if attempts.repairs < self.max_repairs {
                    Decision::Repair
                } else {
                    Decision::GiveUp
                }
            }
            FailureKind::AuthError | FailureKind::Unclassified | FailureKind::Unrepairable => {
                Decision::GiveUp
            }
        }
    }

    fn backoff(&self, failures: u32, cap: u32) -> Decision {
        if failures >= 1 && failures <= cap {
            Decision::Retry(self.delay_for_attempt(failures))
        } else {
            Decision::GiveUp
        }
    }
}
