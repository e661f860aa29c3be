//! Reconnect backoff policy.
//!
//! The policy is a pure function from the state of a failed connection
//! attempt to a decision: give up with a specific error, or wait and try
//! again. It governs connection establishment only; data operations are never
//! retried by this layer.

use std::time::Duration;

use crate::error::StateError;
use crate::options::ComponentOptions;

/// Delay added per attempt.
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Upper bound on a single delay.
const MAX_BACKOFF: Duration = Duration::from_millis(3000);

/// How a connection attempt failed, as far as the policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The remote endpoint actively refused the connection.
    Refused,
    /// Any other transport failure (timeout, reset, DNS, ...).
    Other,
}

/// State of the reconnect loop handed to the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    pub failure: ConnectFailure,
    /// Time spent retrying since the first failure.
    pub total_retry_time: Duration,
    /// 1-based attempt counter.
    pub attempt: u32,
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    ConnectionRefused,
    RetryTimeExhausted,
    /// Attempt limit reached; reported as a generic connection failure.
    RetriesExhausted,
}

impl AbortReason {
    /// Convert into the error surfaced to the caller of `open`.
    pub fn into_error(self, detail: impl Into<String>) -> StateError {
        let detail = detail.into();
        match self {
            Self::ConnectionRefused => StateError::ConnectionRefused(detail),
            Self::RetryTimeExhausted => StateError::RetryTimeExhausted(detail),
            Self::RetriesExhausted => StateError::RetriesExhausted(detail),
        }
    }
}

/// Decision returned by [`BackoffPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Abort(AbortReason),
    Wait(Duration),
}

/// Linear, capped reconnect backoff bounded by total time and attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    timeout: Duration,
    retries: u32,
}

impl BackoffPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    pub fn from_options(options: &ComponentOptions) -> Self {
        Self::new(options.timeout(), options.retries)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Decide what to do after a failed connection attempt.
    ///
    /// Checks are ordered: a refused connection aborts immediately, then the
    /// time bound, then the attempt bound. Otherwise the delay grows by 100ms
    /// per attempt up to 3s.
    pub fn decide(&self, attempt: &ReconnectAttempt) -> ReconnectDecision {
        if attempt.failure == ConnectFailure::Refused {
            return ReconnectDecision::Abort(AbortReason::ConnectionRefused);
        }
        if attempt.total_retry_time > self.timeout {
            return ReconnectDecision::Abort(AbortReason::RetryTimeExhausted);
        }
        if attempt.attempt > self.retries {
            return ReconnectDecision::Abort(AbortReason::RetriesExhausted);
        }
        let delay = BACKOFF_STEP
            .checked_mul(attempt.attempt)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF));
        ReconnectDecision::Wait(delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_options(&ComponentOptions::default())
    }
}
