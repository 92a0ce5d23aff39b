//! Retry with exponential backoff for eventually-consistent provider APIs.
//!
//! The attempt closure classifies its own failures: a transient failure is
//! retried after a backoff sleep, a permanent failure ends the loop at once.

use crate::cancellation::CancellationToken;
use crate::errors::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Jitter applied on top of the exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Backoff policy for [`retry`].
///
/// Delays double from `initial_delay_ms` and are capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Optional budget for the total time spent sleeping, in milliseconds.
    #[serde(default)]
    pub max_elapsed_ms: Option<u64>,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    11
}

impl Default for RetryPolicy {
    /// About two and a half minutes of backoff: enough for tag propagation.
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            max_elapsed_ms: None,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the total sleep budget.
    #[must_use]
    pub fn with_max_elapsed_ms(mut self, budget: u64) -> Self {
        self.max_elapsed_ms = Some(budget);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Checks `initial > 0`, `max >= initial` and `attempts >= 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetryPolicy`] naming the violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "initial_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "max_delay_ms ({}) must be at least initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_elapsed_ms == Some(0) {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_elapsed_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the sleep budget as a `Duration`.
    #[must_use]
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_ms.map(Duration::from_millis)
    }
}

/// Backoff bookkeeping for one retry loop.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: u32,
    /// Sleeps taken so far.
    sleeps: u32,
    /// Total time slept.
    pub slept: Duration,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delay before the next attempt and advances the backoff.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Duration {
        let base = policy.initial_delay_ms;
        let max = policy.max_delay_ms.max(base);
        let delay = base
            .saturating_mul(2u64.saturating_pow(self.sleeps))
            .min(max);
        self.sleeps = self.sleeps.saturating_add(1);

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// What a single attempt reports back to the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<E> {
    /// Done, stop retrying.
    Success,
    /// Failed, but worth another attempt.
    Transient(E),
    /// Failed for good.
    Permanent(E),
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E: Display> {
    /// An attempt reported a permanent failure.
    #[error("{0}")]
    Permanent(E),

    /// Attempts or the sleep budget ran out; carries the last error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: E,
    },

    /// The cancellation token fired.
    #[error("cancelled after {attempts} attempts: {reason}")]
    Cancelled {
        /// Attempts made.
        attempts: u32,
        /// The cancellation reason.
        reason: String,
    },
}

impl<E: Display> RetryError<E> {
    /// Returns the underlying attempt error, if there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => Some(e),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy gives up.
///
/// `attempt` receives the zero-based attempt index. On success returns the
/// number of attempts made. Cancellation is checked before every attempt and
/// interrupts a backoff sleep.
///
/// # Errors
///
/// See [`RetryError`].
pub async fn retry<E, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut attempt: F,
) -> Result<u32, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = RetryState::new();

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(cancelled(token, state.attempts));
            }
        }

        let index = state.attempts;
        state.attempts += 1;

        let err = match attempt(index).await {
            AttemptOutcome::Success => return Ok(state.attempts),
            AttemptOutcome::Permanent(e) => return Err(RetryError::Permanent(e)),
            AttemptOutcome::Transient(e) => e,
        };

        if state.attempts >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: state.attempts,
                last: err,
            });
        }

        let delay = state.next_delay(policy);
        if let Some(budget) = policy.max_elapsed() {
            if state.slept + delay > budget {
                return Err(RetryError::Exhausted {
                    attempts: state.attempts,
                    last: err,
                });
            }
        }

        debug!(
            attempt = state.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Retrying after transient error"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => return Err(cancelled(token, state.attempts)),
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        state.slept += delay;
    }
}

fn cancelled<E: Display>(token: &CancellationToken, attempts: u32) -> RetryError<E> {
    RetryError::Cancelled {
        attempts,
        reason: token.reason().unwrap_or_else(|| "cancelled".to_string()),
    }
}
