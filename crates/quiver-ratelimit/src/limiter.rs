//! Bucket state and the admission loop.

use crate::config::RateLimitConfig;
use hashbrown::HashMap;
use parking_lot::Mutex;
use quiver_core::{CancelToken, ClientEvent, Error, Request};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

/// One token bucket with a FIFO waiter queue.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    rate_per_ms: f64,
    capacity: f64,
    /// Tickets of callers waiting for admission, in arrival order.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl Bucket {
    fn new(rate_per_ms: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            rate_per_ms,
            capacity,
            queue: VecDeque::new(),
            next_ticket: 0,
        }
    }

    /// Advances the bucket to `now`. Refill is monotonic and clamped to
    /// capacity; `tokens` never leaves `[0, capacity]`.
    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.rate_per_ms).min(self.capacity);
        self.last_refill = now;
    }

    /// Wait until the caller at `position` (0 = head) can expect a token.
    fn wait_for_position(&self, position: usize) -> Duration {
        let needed = position as f64 + 1.0;
        let deficit = (needed - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / (self.rate_per_ms * 1000.0))
    }
}

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was not subject to the limiter.
    Bypassed,
    /// A token was consumed after waiting for the given duration.
    Admitted {
        /// Time spent queued; zero for immediate admission.
        waited: Duration,
    },
}

/// A token-bucket rate limiter with scope-derived buckets.
///
/// Buckets are created on first use and protected individually; waiters are
/// strictly FIFO per bucket. Cancellation while queued removes the waiter
/// without consuming a token and surfaces an abort to the caller.
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Mutex<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// Creates a limiter from its configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this request is subject to the limiter, per the configured
    /// include/exclude endpoint patterns.
    pub fn applies_to(&self, req: &Request) -> bool {
        let endpoint = req.endpoint();
        if self
            .config
            .exclude
            .iter()
            .any(|pattern| pattern.matches(&endpoint))
        {
            return false;
        }
        if self.config.include.is_empty() {
            return true;
        }
        self.config
            .include
            .iter()
            .any(|pattern| pattern.matches(&endpoint))
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Tokens currently available for the request's bucket, for diagnostics.
    pub fn available_tokens(&self, req: &Request) -> f64 {
        let key = self.config.scope.key(req);
        let bucket = self.bucket(&key);
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        let mut buckets = self.buckets.lock();
        Arc::clone(buckets.entry_ref(key).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket::new(
                self.config.rate_per_ms,
                self.config.capacity,
            )))
        }))
    }

    /// Waits for a token, honoring cancellation.
    ///
    /// Returns immediately for requests the limiter does not apply to.
    pub async fn admit(&self, req: &Request, cancel: &CancelToken) -> Result<Admission, Error> {
        if !self.applies_to(req) {
            return Ok(Admission::Bypassed);
        }

        let key = self.config.scope.key(req);
        let bucket = self.bucket(&key);
        let descriptor = req.descriptor();
        let started = Instant::now();
        let mut ticket: Option<u64> = None;
        let mut announced = false;

        loop {
            let pending = {
                let mut state = bucket.lock();
                state.refill(Instant::now());

                let position = match ticket {
                    None => state.queue.len(),
                    Some(ticket) => state
                        .queue
                        .iter()
                        .position(|&queued| queued == ticket)
                        .unwrap_or(0),
                };

                if position == 0 && state.tokens >= 1.0 {
                    if ticket.is_some() {
                        state.queue.pop_front();
                    }
                    state.tokens -= 1.0;
                    None
                } else {
                    if ticket.is_none() {
                        let issued = state.next_ticket;
                        state.next_ticket += 1;
                        state.queue.push_back(issued);
                        ticket = Some(issued);
                    }
                    Some(state.wait_for_position(position))
                }
            };

            match pending {
                None => {
                    let waited = started.elapsed();

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "quiver_ratelimit_admissions_total",
                        "limiter" => self.config.name.clone(),
                        "queued" => if waited > Duration::ZERO { "true" } else { "false" }
                    )
                    .increment(1);

                    #[cfg(feature = "tracing")]
                    trace!(limiter = %self.config.name, bucket = %key, ?waited, "admitted");

                    self.config.listeners.emit(&ClientEvent::RateLimitAdmit {
                        descriptor,
                        bucket: key,
                        waited,
                        timestamp: Instant::now(),
                    });
                    return Ok(Admission::Admitted { waited });
                }
                Some(wait) => {
                    if !announced {
                        announced = true;

                        #[cfg(feature = "tracing")]
                        debug!(limiter = %self.config.name, bucket = %key, ?wait, "queued for admission");

                        self.config.listeners.emit(&ClientEvent::RateLimitWait {
                            descriptor: descriptor.clone(),
                            bucket: key.clone(),
                            wait,
                            timestamp: Instant::now(),
                        });
                    }

                    // Sub-millisecond deficits still yield once so the head
                    // waiter can drain ahead of us.
                    let wait = wait.max(Duration::from_millis(1));
                    tokio::select! {
                        biased;
                        reason = cancel.cancelled() => {
                            if let Some(ticket) = ticket {
                                bucket.lock().queue.retain(|&queued| queued != ticket);
                            }
                            return Err(Error::abort(reason));
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}
