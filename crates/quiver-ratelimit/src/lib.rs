//! Token-bucket admission control for the quiver HTTP client.
//!
//! Requests pass through a limiter before anything else runs. Each bucket
//! refills continuously at a configured rate up to a burst capacity, and
//! callers that find the bucket empty queue in strict FIFO order, sleeping
//! exactly as long as their queue position requires. Buckets are derived from
//! a scope: one global bucket, one per host, one per endpoint, or a custom
//! key function.
//!
//! # Example
//!
//! ```rust,no_run
//! use quiver_ratelimit::{RateLimitConfig, RateLimitScope, RateLimiter};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 5 requests/second per host, bursts of 10.
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::builder()
//!         .name("api")
//!         .rate_per_sec(5.0)
//!         .burst(10.0)
//!         .scope(RateLimitScope::Domain)
//!         .exclude("GET /health")
//!         .build()?,
//! );
//! # let _ = limiter;
//! # Ok(())
//! # }
//! ```
//!
//! Cancellation while queued removes the waiter without consuming a token;
//! the caller sees an abort.

#![forbid(unsafe_code)]

mod config;
mod limiter;

pub use config::{RateLimitConfig, RateLimitConfigBuilder, RateLimitConfigError, RateLimitScope};
pub use limiter::{Admission, RateLimiter};
