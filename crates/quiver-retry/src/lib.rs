//! Retry policy and backoff strategies for the quiver HTTP client.
//!
//! This crate is the decision half of the retry orchestrator: given a failed
//! attempt, [`RetryPolicy`] answers whether the failure qualifies for another
//! try and how long to sleep first. The attempt loop itself lives in
//! `quiver-client`, which also re-runs the plugin request chain before each
//! attempt.
//!
//! # Defaults
//!
//! The default decision mirrors what well-behaved HTTP clients do:
//!
//! - never retry an aborted call;
//! - retry timeouts and network failures for idempotent methods only;
//! - retry HTTP statuses 408, 409, 425, 429, 500, 502, 503, 504, and for
//!   non-idempotent methods only when explicitly enabled;
//! - honor `Retry-After` (seconds or HTTP-date) over the backoff strategy.
//!
//! # Example
//!
//! ```rust
//! use quiver_retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .exponential_jitter_backoff(Duration::from_millis(100))
//!     .cap(Duration::from_secs(5))
//!     .build();
//! assert_eq!(policy.max_retries(), 4);
//! ```

#![forbid(unsafe_code)]

mod backoff;
mod policy;
mod retry_after;

pub use backoff::{
    ExponentialInterval, ExponentialJitterInterval, FibonacciInterval, FixedInterval, FnInterval,
    IntervalFn, LinearInterval, UniformJitterInterval,
};
pub use policy::{
    is_idempotent, RetryPolicy, RetryPolicyBuilder, RetryPredicate, DEFAULT_RETRY_STATUSES,
};
pub use retry_after::parse_retry_after;

use quiver_core::{CancelToken, Error};
use std::time::Duration;

/// Sleeps for a backoff delay while observing cancellation.
///
/// A token fired during the sleep wakes it immediately and yields the abort;
/// the caller must not start another attempt.
pub async fn backoff_sleep(delay: Duration, cancel: &CancelToken) -> Result<(), Error> {
    tokio::select! {
        biased;
        reason = cancel.cancelled() => Err(Error::abort(reason)),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
