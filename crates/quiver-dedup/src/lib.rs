//! Request deduplication for the quiver HTTP client.
//!
//! Concurrent requests that derive the same key share one transport call:
//! the first becomes the *leader*, later arrivals attach as *followers* and
//! receive a clone of the leader's outcome, value or error, through a
//! one-shot broadcast. An optional TTL cache extends sharing past completion:
//! a leader's successful result is served to arrivals within the configured
//! window without touching the transport at all.
//!
//! The deduplicator is generic over the shared value so the pipeline can
//! publish whatever its callers await (a response plus bookkeeping); the
//! value only needs to be cheaply cloneable.
//!
//! Cancellation is counted, not forwarded: a follower backing out never
//! disturbs the leader, and the leader's transport is only cancelled when the
//! last remaining observer gives up.
//!
//! # Example
//!
//! ```rust,no_run
//! use quiver_dedup::{DedupConfig, DedupKeyStrategy, Deduplicator};
//! use std::time::Duration;
//!
//! let dedup: Deduplicator<String> = Deduplicator::new(
//!     DedupConfig::builder()
//!         .name("catalog")
//!         .key_strategy(DedupKeyStrategy::UrlMethod)
//!         .cache_ttl(Duration::from_millis(500))
//!         .build(),
//! );
//! # let _ = dedup;
//! ```

#![forbid(unsafe_code)]

mod cache;
mod config;

pub use config::{DedupConfig, DedupConfigBuilder, DedupKeyStrategy};

use cache::TtlCache;
use hashbrown::HashMap;
use parking_lot::Mutex;
use quiver_core::{CancelReason, CancelSource, CancelToken, ClientEvent, Error, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[cfg(feature = "tracing")]
use tracing::debug;

struct InflightEntry<V> {
    generation: u64,
    tx: broadcast::Sender<Result<V, Error>>,
    /// Live observers: the leader's own caller plus attached followers.
    observers: usize,
    /// Fired when the last observer detaches; the leader's downstream work
    /// runs under this source's token.
    cancel: CancelSource,
}

struct Inner<V> {
    config: DedupConfig,
    inflight: Mutex<HashMap<String, InflightEntry<V>>>,
    cache: Mutex<TtlCache<V>>,
    generations: AtomicU64,
}

/// How the deduplicator disposed of an incoming request.
pub enum DedupAdmission<V> {
    /// Method not eligible; the call proceeds alone.
    Bypass,
    /// Served from the TTL cache; no downstream work.
    Cached(V),
    /// This call leads: run downstream under [`LeaderGuard::token`] and
    /// publish through [`LeaderGuard::complete`].
    Leader(LeaderGuard<V>),
    /// An identical call is already in flight; await its outcome.
    Follower(FollowerHandle<V>),
}

/// Coalesces concurrent identical requests.
pub struct Deduplicator<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Deduplicator<V>
where
    V: Clone + Send + 'static,
{
    /// Creates a deduplicator from its configuration.
    pub fn new(config: DedupConfig) -> Self {
        let cache = TtlCache::new(config.cache_ttl, config.cache_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                inflight: Mutex::new(HashMap::new()),
                cache: Mutex::new(cache),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Routes a request: bypass, cache hit, new leader, or follower.
    pub fn admit(&self, req: &Request) -> DedupAdmission<V> {
        if !self.inner.config.eligible(req) {
            return DedupAdmission::Bypass;
        }

        let key = self.inner.config.strategy.key(req);
        let descriptor = req.descriptor();

        if self.inner.config.cache_ttl > Duration::ZERO {
            if let Some(value) = self.inner.cache.lock().get(&key) {
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "quiver_dedup_hits_total",
                    "dedup" => self.inner.config.name.clone(),
                    "source" => "cache"
                )
                .increment(1);

                #[cfg(feature = "tracing")]
                debug!(dedup = %self.inner.config.name, %key, "served from TTL cache");

                self.inner.config.listeners.emit(&ClientEvent::DedupHit {
                    descriptor,
                    key,
                    cached: true,
                    timestamp: Instant::now(),
                });
                return DedupAdmission::Cached(value);
            }
        }

        let mut inflight = self.inner.inflight.lock();
        if let Some(entry) = inflight.get_mut(&key) {
            entry.observers += 1;
            let handle = FollowerHandle {
                inner: Arc::clone(&self.inner),
                key: key.clone(),
                generation: entry.generation,
                rx: entry.tx.subscribe(),
                settled: false,
            };
            drop(inflight);

            #[cfg(feature = "metrics")]
            metrics::counter!(
                "quiver_dedup_hits_total",
                "dedup" => self.inner.config.name.clone(),
                "source" => "inflight"
            )
            .increment(1);

            #[cfg(feature = "tracing")]
            debug!(dedup = %self.inner.config.name, %key, "attached as follower");

            self.inner.config.listeners.emit(&ClientEvent::DedupHit {
                descriptor,
                key,
                cached: false,
                timestamp: Instant::now(),
            });
            DedupAdmission::Follower(handle)
        } else {
            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
            let (tx, _) = broadcast::channel(1);
            let cancel = CancelSource::new();
            let token = cancel.token();
            inflight.insert(
                key.clone(),
                InflightEntry {
                    generation,
                    tx,
                    observers: 1,
                    cancel,
                },
            );
            drop(inflight);

            #[cfg(feature = "metrics")]
            metrics::counter!(
                "quiver_dedup_misses_total",
                "dedup" => self.inner.config.name.clone()
            )
            .increment(1);

            #[cfg(feature = "tracing")]
            debug!(dedup = %self.inner.config.name, %key, "leading");

            self.inner.config.listeners.emit(&ClientEvent::DedupMiss {
                descriptor,
                key: key.clone(),
                timestamp: Instant::now(),
            });
            DedupAdmission::Leader(LeaderGuard {
                inner: Arc::clone(&self.inner),
                key,
                generation,
                token,
                completed: false,
            })
        }
    }

    /// Number of keys currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Number of cached results.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.lock().len()
    }
}

impl<V> std::fmt::Debug for Deduplicator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("config", &self.inner.config)
            .field("inflight", &self.inner.inflight.lock().len())
            .finish()
    }
}

/// Held by the call that leads its key.
///
/// Downstream work must run under [`LeaderGuard::token`]: that token fires
/// only when every observer has detached. The leader's own caller awaits the
/// outcome through the handle from [`LeaderGuard::subscribe`] so that its own
/// cancellation detaches it without tearing down the shared work.
pub struct LeaderGuard<V> {
    inner: Arc<Inner<V>>,
    key: String,
    generation: u64,
    token: CancelToken,
    completed: bool,
}

impl<V> LeaderGuard<V>
where
    V: Clone + Send + 'static,
{
    /// The effective cancellation token for the shared downstream work.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// A handle representing the leader's own caller. Call once.
    pub fn subscribe(&self) -> FollowerHandle<V> {
        let inflight = self.inner.inflight.lock();
        let entry = inflight
            .get(&self.key)
            .filter(|entry| entry.generation == self.generation);
        let rx = match entry {
            Some(entry) => entry.tx.subscribe(),
            // Entry already gone: a fresh channel whose sender is dropped,
            // so waiting reports the leader as abandoned.
            None => broadcast::channel(1).1,
        };
        FollowerHandle {
            inner: Arc::clone(&self.inner),
            key: self.key.clone(),
            generation: self.generation,
            rx,
            settled: false,
        }
    }

    /// Publishes the outcome to every observer and releases the key.
    ///
    /// Successful values enter the TTL cache when caching is enabled.
    pub fn complete(mut self, outcome: Result<V, Error>) {
        self.completed = true;
        let entry = {
            let mut inflight = self.inner.inflight.lock();
            let current = inflight
                .get(&self.key)
                .is_some_and(|entry| entry.generation == self.generation);
            if current {
                inflight.remove(&self.key)
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            if self.inner.config.cache_ttl > Duration::ZERO {
                if let Ok(value) = &outcome {
                    self.inner
                        .cache
                        .lock()
                        .insert(self.key.clone(), value.clone());
                }
            }
            let _ = entry.tx.send(outcome);
        }
    }
}

impl<V> Drop for LeaderGuard<V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // Leader abandoned without publishing: drop the entry so followers
        // observe a closed channel instead of waiting forever.
        let mut inflight = self.inner.inflight.lock();
        let current = inflight
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation);
        if current {
            inflight.remove(&self.key);
        }
    }
}

/// Awaits a leader's published outcome.
pub struct FollowerHandle<V> {
    inner: Arc<Inner<V>>,
    key: String,
    generation: u64,
    rx: broadcast::Receiver<Result<V, Error>>,
    settled: bool,
}

impl<V> FollowerHandle<V>
where
    V: Clone + Send + 'static,
{
    /// Waits for the outcome, detaching on cancellation.
    ///
    /// A cancelled observer decrements the key's observer count; the leader's
    /// work is cancelled only when that count reaches zero.
    pub async fn wait(mut self, cancel: &CancelToken) -> Result<V, Error> {
        tokio::select! {
            biased;
            reason = cancel.cancelled() => {
                self.detach();
                Err(Error::abort(reason))
            }
            received = self.rx.recv() => {
                self.settled = true;
                match received {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::network("deduplicated leader abandoned the request")),
                }
            }
        }
    }
}

impl<V> FollowerHandle<V> {
    fn detach(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut inflight = self.inner.inflight.lock();
        if let Some(entry) = inflight.get_mut(&self.key) {
            if entry.generation == self.generation {
                entry.observers = entry.observers.saturating_sub(1);
                if entry.observers == 0 {
                    entry.cancel.fire(CancelReason::User);
                }
            }
        }
    }
}

impl<V> Drop for FollowerHandle<V> {
    fn drop(&mut self) {
        self.detach();
    }
}
