//! The retry policy: how many attempts, which failures qualify, and how long
//! to wait between them.

use crate::backoff::{
    ExponentialInterval, ExponentialJitterInterval, FibonacciInterval, FixedInterval, FnInterval,
    IntervalFn, LinearInterval, UniformJitterInterval,
};
use crate::retry_after::parse_retry_after;
use http::Method;
use quiver_core::{Error, ErrorKind};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::debug;

/// Statuses retried by default: request timeouts, conflicts, early hints
/// rejections, throttles, and the transient 5xx family.
pub const DEFAULT_RETRY_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Whether repeating `method` is safe.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// A user predicate replacing the default should-retry decision.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Decides whether and when failed attempts are repeated.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    interval: Arc<dyn IntervalFn>,
    cap: Option<Duration>,
    retry_statuses: Vec<u16>,
    retry_non_idempotent: bool,
    respect_retry_after: bool,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Starts a builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// A policy with `max_retries` retries and the default exponential
    /// backoff.
    pub fn attempts(max_retries: u32) -> Self {
        Self::builder().max_retries(max_retries).build()
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `error` on attempt `attempt` should be retried.
    ///
    /// The attempt budget is checked first; within it, a user predicate
    /// replaces the default decision entirely.
    pub fn should_retry(&self, error: &Error, method: &Method, attempt: u32) -> bool {
        let decision = self.decide(error, method, attempt);

        #[cfg(feature = "tracing")]
        debug!(
            kind = error.kind().as_str(),
            method = %method,
            attempt,
            retry = decision,
            "retry decision"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "quiver_retry_decisions_total",
            "kind" => error.kind().as_str(),
            "retry" => if decision { "true" } else { "false" }
        )
        .increment(1);

        decision
    }

    fn decide(&self, error: &Error, method: &Method, attempt: u32) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            return predicate(error);
        }
        match error.kind() {
            ErrorKind::Abort => false,
            ErrorKind::Timeout | ErrorKind::Network => is_idempotent(method),
            ErrorKind::Http => {
                let status = match error.status() {
                    Some(status) => status.as_u16(),
                    None => return false,
                };
                self.retry_statuses.contains(&status)
                    && (is_idempotent(method) || self.retry_non_idempotent)
            }
            ErrorKind::Parse | ErrorKind::Plugin => false,
        }
    }

    /// Delay before the attempt following the failure of `attempt`.
    ///
    /// A parseable `Retry-After` on the failing response wins over the
    /// backoff strategy; the configured cap clamps either.
    pub fn backoff_delay(&self, attempt: u32, error: &Error) -> Duration {
        let retry_after = self.retry_after_delay(error);

        #[cfg(feature = "tracing")]
        if let Some(after) = retry_after {
            debug!(delay_ms = after.as_millis() as u64, "honoring Retry-After");
        }

        #[cfg(feature = "metrics")]
        if retry_after.is_some() {
            metrics::counter!("quiver_retry_after_honored_total").increment(1);
        }

        let delay = retry_after.unwrap_or_else(|| self.interval.interval(attempt));
        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    fn retry_after_delay(&self, error: &Error) -> Option<Duration> {
        if !self.respect_retry_after {
            return None;
        }
        parse_retry_after(&error.response()?.headers)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("cap", &self.cap)
            .field("retry_statuses", &self.retry_statuses)
            .field("retry_non_idempotent", &self.retry_non_idempotent)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("has_predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryPolicy`].
///
/// Defaults: 3 retries, exponential backoff from 100 ms, default status set,
/// idempotent methods only, `Retry-After` honored.
pub struct RetryPolicyBuilder {
    max_retries: u32,
    interval: Arc<dyn IntervalFn>,
    cap: Option<Duration>,
    retry_statuses: Vec<u16>,
    retry_non_idempotent: bool,
    respect_retry_after: bool,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicyBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            interval: Arc::new(ExponentialInterval::new(Duration::from_millis(100))),
            cap: None,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            retry_non_idempotent: false,
            respect_retry_after: true,
            predicate: None,
        }
    }

    /// Sets the number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Fixed backoff.
    pub fn fixed_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(FixedInterval::new(base));
        self
    }

    /// Linear backoff (`base × attempt`).
    pub fn linear_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(LinearInterval::new(base));
        self
    }

    /// Exponential backoff with a doubling multiplier.
    pub fn exponential_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(ExponentialInterval::new(base));
        self
    }

    /// Exponential backoff clamped at `cap`.
    pub fn exponential_backoff_capped(mut self, base: Duration, cap: Duration) -> Self {
        self.interval = Arc::new(ExponentialInterval::new(base));
        self.cap = Some(cap);
        self
    }

    /// Fibonacci backoff.
    pub fn fibonacci_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(FibonacciInterval::new(base));
        self
    }

    /// Uniform random backoff in `[0, base]`.
    pub fn uniform_jitter_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(UniformJitterInterval::new(base));
        self
    }

    /// Full-jitter exponential backoff.
    pub fn exponential_jitter_backoff(mut self, base: Duration) -> Self {
        self.interval = Arc::new(ExponentialJitterInterval::new(base));
        self
    }

    /// Custom interval strategy.
    pub fn backoff<I>(mut self, interval: I) -> Self
    where
        I: IntervalFn + 'static,
    {
        self.interval = Arc::new(interval);
        self
    }

    /// Closure-based interval strategy; the argument is the 1-based attempt
    /// that just failed.
    pub fn backoff_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.interval = Arc::new(FnInterval::new(f));
        self
    }

    /// Clamps every computed delay.
    pub fn cap(mut self, cap: Duration) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Replaces the retryable status set.
    pub fn retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    /// Allows retrying non-idempotent methods on retryable statuses.
    pub fn retry_non_idempotent(mut self, allow: bool) -> Self {
        self.retry_non_idempotent = allow;
        self
    }

    /// Controls whether `Retry-After` overrides the backoff strategy.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Replaces the default should-retry decision with a user predicate.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Builds the policy.
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            interval: self.interval,
            cap: self.cap,
            retry_statuses: self.retry_statuses,
            retry_non_idempotent: self.retry_non_idempotent,
            respect_retry_after: self.respect_retry_after,
            predicate: self.predicate,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
