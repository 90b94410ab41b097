//! Retry eligibility and pacing policies.
//!
//! A [`RetryPolicy`] answers three questions for the orchestrator:
//! - is this attempt's outcome acceptable ([`RetryPolicy::is_valid`])?
//! - if not, may it be repeated ([`RetryPolicy::is_retryable`])?
//! - how long to wait before the next attempt, or whether to stop
//!   ([`RetryPolicy::sleep_duration`])?
//!
//! Pacing is a pure function of the item's attempt count, never of wall-clock
//! time. Three reference policies are provided:
//!
//! | Policy | Attempts | Delays before each attempt |
//! |--------|----------|----------------------------|
//! | [`RequestPolicy`] | 1 | 0 |
//! | [`Lenient`] | 5 | 0.25s, then 60s |
//! | [`BackOff`] | 10 | 0.25, 0.5, 1, 2, 4, 8, 16, 32, 60, 60 s |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bulkfetch_core::download::{AttemptOutcome, BackOff, RetryPolicy};
//!
//! let policy = BackOff::default();
//! assert_eq!(policy.sleep_duration(0), Some(Duration::from_millis(250)));
//! assert_eq!(policy.sleep_duration(10), None);
//! assert!(!policy.is_retryable(AttemptOutcome::Status(404)));
//! ```

use std::fmt::Debug;
use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::{DEFAULT_TIMEOUT, ERROR_STATUS_THRESHOLD, NOT_FOUND_STATUS};

/// Default attempt limit for [`Lenient`].
pub const LENIENT_MAX_ATTEMPTS: u32 = 5;

/// Default attempt limit for [`BackOff`].
pub const BACKOFF_MAX_ATTEMPTS: u32 = 10;

/// Delay before the first [`Lenient`] attempt.
const LENIENT_FIRST_DELAY: Duration = Duration::from_millis(250);

/// Delay before every later [`Lenient`] attempt.
const LENIENT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default upper bound on a [`BackOff`] delay.
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// What a single network attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The server answered with this status code.
    Status(u16),
    /// The attempt exceeded the per-request timeout.
    TimedOut,
    /// The connection failed, or broke before the body was complete.
    ConnectionFailed,
}

impl AttemptOutcome {
    /// Returns the HTTP status code, if the server answered.
    #[must_use]
    pub fn status(self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(status),
            Self::TimedOut | Self::ConnectionFailed => None,
        }
    }

    /// Classifies a download error as an attempt outcome.
    ///
    /// Returns `None` for errors that are not attempt outcomes at all: a
    /// malformed URL never reaches the network and an IO error belongs to the
    /// storage layer.
    #[must_use]
    pub fn from_error(error: &DownloadError) -> Option<Self> {
        match error {
            DownloadError::HttpStatus { status, .. } => Some(Self::Status(*status)),
            DownloadError::Timeout { .. } => Some(Self::TimedOut),
            DownloadError::Network { .. } => Some(Self::ConnectionFailed),
            DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } => None,
        }
    }
}

/// Decides whether, when and how often an item is (re)attempted.
///
/// Implementations must be pure: the same inputs always produce the same
/// answer. Only [`delay_for`](Self::delay_for) and
/// [`max_attempts`](Self::max_attempts) are required; the rest have the
/// defaults documented on each method.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Maximum number of attempts per item. `0` means "never retry", which
    /// still allows the initial attempt.
    fn max_attempts(&self) -> u32;

    /// Pacing delay before the attempt that follows `attempts` completed ones.
    fn delay_for(&self, attempts: u32) -> Duration;

    /// Bound on each network attempt, body included.
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Whether the outcome counts as success. Defaults to status below 400.
    fn is_valid(&self, outcome: AttemptOutcome) -> bool {
        matches!(outcome, AttemptOutcome::Status(status) if status < ERROR_STATUS_THRESHOLD)
    }

    /// Whether a failing outcome may be retried. Defaults to everything except
    /// 404, which is taken as the origin's final word.
    fn is_retryable(&self, outcome: AttemptOutcome) -> bool {
        outcome.status() != Some(NOT_FOUND_STATUS)
    }

    /// Number of attempts actually allowed.
    fn attempt_budget(&self) -> u32 {
        self.max_attempts().max(1)
    }

    /// Sleep before the next attempt, or `None` once the budget is spent.
    fn sleep_duration(&self, attempts: u32) -> Option<Duration> {
        (attempts < self.attempt_budget()).then(|| self.delay_for(attempts))
    }
}

/// Decision on what to do after a failing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Go around the loop again.
    Retry,

    /// Give up on the item.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Applies a policy to a failing outcome after `attempts` attempts.
#[instrument(skip(policy), fields(max_attempts = policy.max_attempts()))]
pub fn should_retry(
    policy: &dyn RetryPolicy,
    outcome: AttemptOutcome,
    attempts: u32,
) -> RetryDecision {
    if !policy.is_retryable(outcome) {
        return RetryDecision::DoNotRetry {
            reason: format!("{outcome:?} is not retryable"),
        };
    }

    let budget = policy.attempt_budget();
    if attempts >= budget {
        debug!(attempts, budget, "max attempts reached");
        return RetryDecision::DoNotRetry {
            reason: format!("max attempts ({budget}) exhausted"),
        };
    }

    RetryDecision::Retry
}

/// Base request policy: a single attempt, no pacing, nothing is retried.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    max_attempts: u32,
    timeout: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RequestPolicy {
    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RetryPolicy for RequestPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, _attempts: u32) -> Duration {
        Duration::ZERO
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_retryable(&self, _outcome: AttemptOutcome) -> bool {
        false
    }
}

/// Policy for an average web server: five tries with a minute between each.
///
/// The first attempt waits 0.25s; every retry waits 60s.
#[derive(Debug, Clone)]
pub struct Lenient {
    max_attempts: u32,
    timeout: Duration,
}

impl Default for Lenient {
    fn default() -> Self {
        Self {
            max_attempts: LENIENT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Lenient {
    /// Creates a policy with a custom attempt limit.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RetryPolicy for Lenient {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            LENIENT_FIRST_DELAY
        } else {
            LENIENT_RETRY_DELAY
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Exponential back-off for origins that can take a little more load.
///
/// Delay before the attempt following `n` completed attempts is
/// `min(2^(n-2) s, ceiling)`. The exponent starts at `-2`, so the
/// first two delays are fractional: 0.25, 0.5, 1, 2, 4, 8, 16, 32, 60, 60.
#[derive(Debug, Clone)]
pub struct BackOff {
    max_attempts: u32,
    timeout: Duration,
    ceiling: Duration,
}

impl Default for BackOff {
    fn default() -> Self {
        Self {
            max_attempts: BACKOFF_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            ceiling: BACKOFF_CEILING,
        }
    }
}

impl BackOff {
    /// Creates a policy with a custom attempt limit.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the largest delay the policy will ever return.
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }
}

impl RetryPolicy for BackOff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        let delay = match attempts {
            0 => Duration::from_millis(250),
            1 => Duration::from_millis(500),
            n => 1u64
                .checked_shl(n - 2)
                .map_or(self.ceiling, Duration::from_secs),
        };
        delay.min(self.ceiling)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
