//! Trailing-edge request debouncing for the quiver HTTP client.
//!
//! A burst of requests sharing a key collapses to the latest one: each new
//! arrival supersedes the pending entry for its key, aborting the previous
//! caller with a debounce-flavored cancellation, then waits out the window
//! itself. Only a call that is still the newest when its timer fires proceeds
//! downstream.
//!
//! # Example
//!
//! ```rust,no_run
//! use quiver_debounce::{DebounceConfig, DebounceKeyStrategy, Debouncer};
//! use std::time::Duration;
//!
//! let debouncer = Debouncer::new(
//!     DebounceConfig::builder()
//!         .name("search")
//!         .delay(Duration::from_millis(250))
//!         .key_strategy(DebounceKeyStrategy::MethodUrl)
//!         .build(),
//! );
//! # let _ = debouncer;
//! ```

#![forbid(unsafe_code)]

mod config;

pub use config::{DebounceConfig, DebounceConfigBuilder, DebounceKeyStrategy};

use hashbrown::HashMap;
use parking_lot::Mutex;
use quiver_core::{
    CancelReason, CancelSource, CancelToken, ClientEvent, Error, Request, RequestDescriptor,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::debug;

struct Pending {
    generation: u64,
    /// Fired with [`CancelReason::Debounced`] when a newer call takes the key.
    cancel: CancelSource,
    descriptor: RequestDescriptor,
}

struct Inner {
    config: DebounceConfig,
    pending: Mutex<HashMap<String, Pending>>,
    generations: AtomicU64,
}

/// Delays calls and collapses bursts to the newest request per key.
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    /// Creates a debouncer from its configuration.
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pending: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Holds the call for `delay`, superseding any pending call on the same
    /// key. Returns once the call survived its window and may proceed.
    ///
    /// Errors are all abort-class: [`CancelReason::Debounced`] when a newer
    /// call took the key, or the caller's own cancellation reason.
    pub async fn acquire(
        &self,
        req: &Request,
        delay: Duration,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let key = self.inner.config.strategy.key(req);
        let descriptor = req.descriptor();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let source = CancelSource::new();
        let superseded = source.token();

        let previous = self.inner.pending.lock().insert(
            key.clone(),
            Pending {
                generation,
                cancel: source,
                descriptor: descriptor.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.fire(CancelReason::Debounced);

            #[cfg(feature = "metrics")]
            metrics::counter!(
                "quiver_debounce_superseded_total",
                "debounce" => self.inner.config.name.clone()
            )
            .increment(1);

            #[cfg(feature = "tracing")]
            debug!(debounce = %self.inner.config.name, %key, "superseded pending request");

            self.inner.config.listeners.emit(&ClientEvent::DebounceCancel {
                descriptor: previous.descriptor,
                key: key.clone(),
                timestamp: Instant::now(),
            });
        }

        tokio::select! {
            biased;
            reason = superseded.cancelled() => {
                // A newer call owns the key; our entry is already gone.
                Err(Error::abort(reason))
            }
            reason = cancel.cancelled() => {
                self.remove_if_current(&key, generation);
                Err(Error::abort(reason))
            }
            _ = tokio::time::sleep(delay) => {
                if self.remove_if_current(&key, generation) {
                    #[cfg(feature = "tracing")]
                    debug!(debounce = %self.inner.config.name, %key, ?delay, "dispatching");

                    self.inner.config.listeners.emit(&ClientEvent::DebounceDispatch {
                        descriptor,
                        key,
                        delay,
                        timestamp: Instant::now(),
                    });
                    Ok(())
                } else {
                    Err(Error::abort(CancelReason::Debounced))
                }
            }
        }
    }

    /// Number of keys with a pending call.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// The configured default window.
    pub fn default_delay(&self) -> Duration {
        self.inner.config.delay()
    }

    fn remove_if_current(&self, key: &str, generation: u64) -> bool {
        let mut pending = self.inner.pending.lock();
        let current = pending
            .get(key)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            pending.remove(key);
        }
        current
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_len())
            .finish()
    }
}
