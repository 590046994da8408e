//! Resilient HTTP client toolkit.
//!
//! `quiver` wraps a pluggable transport in a request-lifecycle orchestrator:
//! pre-flight admission control (deduplication, debouncing, token-bucket rate
//! limiting), in-flight reliability (per-attempt timeouts, retries with
//! backoff, request hedging), and post-flight handling (typed response
//! decoding, a closed six-kind error taxonomy), all mediated by an ordered
//! plugin chain and reported through one stats event stream.
//!
//! Each pattern lives in its own crate and is re-exported here behind a
//! feature; the default `client` feature pulls in the full facade.
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! quiver = "0.3"
//! ```
//!
//! ```rust,no_run
//! use quiver::client::{Client, RequestOptions};
//! use quiver::core::{transport_fn, RawResponse};
//! use quiver::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder()
//!     .transport(transport_fn(|_req, _cancel| async {
//!         Ok(RawResponse::new(http::StatusCode::OK))
//!     }))
//!     .retry(RetryPolicy::builder()
//!         .max_retries(3)
//!         .exponential_backoff(Duration::from_millis(100))
//!         .build())
//!     .build()?;
//!
//! let response = client.get("https://api.example.com/items", RequestOptions::new()).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

/// Records, cancellation, events, and the transport boundary.
pub mod core {
    pub use quiver_core::*;
}

/// The client facade.
#[cfg(feature = "client")]
pub mod client {
    pub use quiver_client::*;
}

/// Token-bucket rate limiting.
#[cfg(feature = "ratelimit")]
pub mod ratelimit {
    pub use quiver_ratelimit::*;
}

/// Request deduplication.
#[cfg(feature = "dedup")]
pub mod dedup {
    pub use quiver_dedup::*;
}

/// Request debouncing.
#[cfg(feature = "debounce")]
pub mod debounce {
    pub use quiver_debounce::*;
}

/// Request hedging.
#[cfg(feature = "hedge")]
pub mod hedge {
    pub use quiver_hedge::*;
}

/// Retry policy and backoff strategies.
#[cfg(feature = "retry")]
pub mod retry {
    pub use quiver_retry::*;
}
