//! The quiver HTTP client facade.
//!
//! This crate assembles the pattern crates into one pipeline and exposes the
//! typed call surface. A call flows through admission control (rate limiter,
//! debouncer, deduplicator), then the retry orchestrator, whose every attempt
//! runs the plugin `on_request` chain, the (optionally hedged) transport
//! exchange, and the plugin `on_response`/`on_response_error` chain.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use quiver_client::{Client, RequestOptions};
//! use quiver_core::{transport_fn, RawResponse};
//! use quiver_retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder()
//!     .transport(transport_fn(|req, _cancel| async move {
//!         // Bridge to a real HTTP implementation here.
//!         Ok(RawResponse::new(http::StatusCode::OK))
//!     }))
//!     .base_url(url::Url::parse("https://api.example.com/v1/")?)
//!     .timeout(Duration::from_secs(10))
//!     .retry(RetryPolicy::builder()
//!         .max_retries(3)
//!         .exponential_jitter_backoff(Duration::from_millis(100))
//!         .build())
//!     .build()?;
//!
//! let items: serde_json::Value = client.get_json("items").await?;
//! # let _ = items;
//! # Ok(())
//! # }
//! ```
//!
//! Any `tower::Service` can serve as the transport through
//! [`TowerTransport`]; tests in this workspace mock exchanges with
//! `tower::service_fn` and [`quiver_core::transport_fn`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod context;
mod extensions;
mod pipeline;
mod plugin;
mod tower_transport;

pub use client::{BuildError, Client, ClientBuilder};
pub use config::{
    DebounceSetting, DedupSetting, RateLimitSetting, RequestOptions, RetrySetting, TimeoutSetting,
};
pub use context::Context;
pub use extensions::Extensions;
pub use plugin::Plugin;
pub use tower_transport::TowerTransport;

// The vocabulary callers need alongside the facade.
pub use quiver_core::{
    transport_fn, Body, CancelReason, CancelSource, CancelToken, ClientEvent, Error, ErrorKind,
    EventListener, FnListener, MultipartForm, RawResponse, Request, RequestDescriptor, RequestId,
    Response, ResponseData, ResponseType, StatsEvent, StatsListeners, Transport, TransportError,
};
pub use quiver_debounce::{DebounceConfig, DebounceKeyStrategy};
pub use quiver_dedup::{DedupConfig, DedupKeyStrategy};
pub use quiver_hedge::{HedgeMode, HedgePolicy};
pub use quiver_ratelimit::{RateLimitConfig, RateLimitScope};
pub use quiver_retry::RetryPolicy;
