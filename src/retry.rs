//! Retry state and backoff policy for the stream relay
//!
//! The relay threads a [`RetryState`] value through its attempts instead of
//! mutating captured counters. Each failure is handed to
//! [`RetryState::on_failure`], which either returns the delay before the next
//! attempt together with the advanced state, or the terminal error.
//!
//! # Example
//!
//! ```
//! use media_relay::config::RelayConfig;
//! use media_relay::error::RelayError;
//! use media_relay::retry::{RetryDecision, RetryState};
//!
//! let state = RetryState::new(&RelayConfig::default()).begin_attempt();
//! match state.on_failure(RelayError::TransientExpired { status: 403 }) {
//!     RetryDecision::Retry { delay, .. } => assert_eq!(delay.as_millis(), 500),
//!     RetryDecision::GiveUp(err) => panic!("unexpected: {err}"),
//! }
//! ```

use crate::config::{BackoffPolicy, RelayConfig};
use crate::error::{Error, ErrorKind, RelayError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (expired URLs, timeouts, connection resets) should return `true`.
/// Permanent failures (fatal HTTP status, resolver failure, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RelayError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::TransientExpired { .. } | RelayError::TransientNetwork { .. }
        )
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Relay(e) => e.is_retryable(),
            // Connection-level failures outside the relay loop
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Resolver failures are terminal for the relay
            Error::Resolver { .. } => false,
            Error::Cancelled | Error::ShuttingDown => false,
            _ => false,
        }
    }
}

/// Per-invocation retry bookkeeping
///
/// Owned by exactly one relay invocation and dropped when it terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<ErrorKind>,
    backoff_base: Duration,
    policy: BackoffPolicy,
    jitter: bool,
}

/// Outcome of feeding a failure into [`RetryState::on_failure`]
#[derive(Debug)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run the next attempt with `state`
    Retry {
        /// Advanced state to use for the next attempt
        state: RetryState,
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Stop and surface this error
    GiveUp(RelayError),
}

impl RetryState {
    /// Fresh state, no attempt made yet
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts.max(1),
            last_error: None,
            backoff_base: config.backoff_base,
            policy: config.backoff,
            jitter: config.jitter,
        }
    }

    /// Number of attempts started so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured attempt ceiling
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classification of the most recent failure
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Mark the start of the next attempt
    pub fn begin_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }

    /// Decide what follows a failed attempt
    pub fn on_failure(self, error: RelayError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp(error);
        }

        if self.attempt >= self.max_attempts {
            return RetryDecision::GiveUp(RelayError::ExhaustedRetries {
                attempts: self.attempt,
                last: Box::new(error),
            });
        }

        let base = self.delay_for(self.attempt);
        let delay = if self.jitter { add_jitter(base) } else { base };
        RetryDecision::Retry {
            state: Self {
                last_error: Some(error.kind()),
                ..self
            },
            delay,
        }
    }

    /// Undecorated delay after the given (1-based) failed attempt
    fn delay_for(&self, attempt: u32) -> Duration {
        match self.policy {
            BackoffPolicy::Linear => self.backoff_base.saturating_mul(attempt),
            BackoffPolicy::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let secs = self.backoff_base.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
