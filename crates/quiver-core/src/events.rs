//! The stats event bus.
//!
//! Every stage of the pipeline reports lifecycle points through a single
//! closed [`ClientEvent`] union so sinks can match exhaustively. Emission is
//! synchronous, best-effort, and panic-isolated: one misbehaving listener
//! never prevents the others from observing an event, and never fails the
//! request that emitted it.

use crate::error::ErrorKind;
use crate::request::{RequestDescriptor, RequestId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use std::any::Any;

/// Trait for events carried by an [`EventListeners`] bus.
pub trait StatsEvent: Send + Sync + fmt::Debug {
    /// Stable event label, e.g. `"request:retry"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// The call the event belongs to.
    fn request_id(&self) -> RequestId;
}

/// Trait for observing events.
pub trait EventListener<E: StatsEvent>: Send + Sync {
    /// Called once per emitted event.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// An ordered collection of listeners sharing one event stream.
#[derive(Clone)]
pub struct EventListeners<E: StatsEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: StatsEvent> EventListeners<E> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// A panicking listener is caught so the remaining listeners still run.
    /// With the `tracing` feature the panic is logged as a warning; with the
    /// `metrics` feature a counter is incremented.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "quiver_event_listener_panics_total",
                    "event_type" => event.event_type()
                )
                .increment(1);

                #[cfg(not(feature = "tracing"))]
                let _ = index;
            }
        }
    }

    /// Shares every listener of `other` with this collection.
    pub fn extend_from(&mut self, other: &EventListeners<E>) {
        self.listeners.extend(other.listeners.iter().cloned());
    }

    /// True when no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: StatsEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: StatsEvent>(index: usize, event: &E, panic_payload: &(dyn Any + Send)) {
    let panic_message = panic_payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        event_type = event.event_type(),
        request_id = %event.request_id(),
        panic_message = %panic_message,
        "stats event listener panicked"
    );
}

/// A function-based listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps `f` as a listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: StatsEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Listeners for the pipeline's own event stream.
pub type StatsListeners = EventListeners<ClientEvent>;

/// Every lifecycle point the pipeline reports, as a closed union.
///
/// Each variant carries the call's [`RequestDescriptor`] plus event-specific
/// numerics. Variants are emitted at most once per logical lifecycle point of
/// a call.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A user-visible call entered the pipeline.
    RequestStart {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The call completed with a response.
    RequestSuccess {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Final HTTP status.
        status: u16,
        /// Attempts consumed, including the first.
        attempts: u32,
        /// Wall time from start to completion.
        elapsed: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The call completed with an error.
    RequestFail {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Classification of the final error.
        kind: ErrorKind,
        /// Attempts consumed, including the first.
        attempts: u32,
        /// Wall time from start to completion.
        elapsed: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// A failed attempt will be retried after a backoff.
    RequestRetry {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Attempt that just failed (1-based).
        attempt: u32,
        /// Backoff delay before the next attempt.
        delay: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The deduplicator satisfied the call without a new transport call.
    DedupHit {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Dedup key.
        key: String,
        /// True when served from the TTL cache rather than an in-flight leader.
        cached: bool,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The call became the dedup leader for its key.
    DedupMiss {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Dedup key.
        key: String,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// A pending debounced call was superseded.
    DebounceCancel {
        /// Identity of the superseded call.
        descriptor: RequestDescriptor,
        /// Debounce key.
        key: String,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// A debounced call survived its window and was forwarded.
    DebounceDispatch {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Debounce key.
        key: String,
        /// The window that elapsed.
        delay: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The rate limiter queued the call.
    RateLimitWait {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Bucket key the call is queued on.
        bucket: String,
        /// Predicted wait at enqueue time.
        wait: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// The rate limiter admitted the call.
    RateLimitAdmit {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Bucket key the call was admitted on.
        bucket: String,
        /// Time actually spent waiting.
        waited: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// A hedge racer was launched.
    HedgeLaunch {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Racer index (0 = primary).
        attempt: usize,
        /// Delay that elapsed before launch.
        delay: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// A racer won the hedge race.
    HedgeWin {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Winning racer index (0 = primary).
        attempt: usize,
        /// Wall time from race start to the win.
        elapsed: Duration,
        /// When this event occurred.
        timestamp: Instant,
    },
    /// An outstanding racer was pruned.
    HedgeCancel {
        /// Call identity.
        descriptor: RequestDescriptor,
        /// Pruned racer index (0 = primary).
        attempt: usize,
        /// When this event occurred.
        timestamp: Instant,
    },
}

impl ClientEvent {
    /// The descriptor carried by every variant.
    pub fn descriptor(&self) -> &RequestDescriptor {
        match self {
            ClientEvent::RequestStart { descriptor, .. }
            | ClientEvent::RequestSuccess { descriptor, .. }
            | ClientEvent::RequestFail { descriptor, .. }
            | ClientEvent::RequestRetry { descriptor, .. }
            | ClientEvent::DedupHit { descriptor, .. }
            | ClientEvent::DedupMiss { descriptor, .. }
            | ClientEvent::DebounceCancel { descriptor, .. }
            | ClientEvent::DebounceDispatch { descriptor, .. }
            | ClientEvent::RateLimitWait { descriptor, .. }
            | ClientEvent::RateLimitAdmit { descriptor, .. }
            | ClientEvent::HedgeLaunch { descriptor, .. }
            | ClientEvent::HedgeWin { descriptor, .. }
            | ClientEvent::HedgeCancel { descriptor, .. } => descriptor,
        }
    }
}

impl StatsEvent for ClientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::RequestStart { .. } => "request:start",
            ClientEvent::RequestSuccess { .. } => "request:success",
            ClientEvent::RequestFail { .. } => "request:fail",
            ClientEvent::RequestRetry { .. } => "request:retry",
            ClientEvent::DedupHit { .. } => "dedup:hit",
            ClientEvent::DedupMiss { .. } => "dedup:miss",
            ClientEvent::DebounceCancel { .. } => "debounce:cancel",
            ClientEvent::DebounceDispatch { .. } => "debounce:dispatch",
            ClientEvent::RateLimitWait { .. } => "ratelimit:wait",
            ClientEvent::RateLimitAdmit { .. } => "ratelimit:admit",
            ClientEvent::HedgeLaunch { .. } => "hedge:launch",
            ClientEvent::HedgeWin { .. } => "hedge:win",
            ClientEvent::HedgeCancel { .. } => "hedge:cancel",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ClientEvent::RequestStart { timestamp, .. }
            | ClientEvent::RequestSuccess { timestamp, .. }
            | ClientEvent::RequestFail { timestamp, .. }
            | ClientEvent::RequestRetry { timestamp, .. }
            | ClientEvent::DedupHit { timestamp, .. }
            | ClientEvent::DedupMiss { timestamp, .. }
            | ClientEvent::DebounceCancel { timestamp, .. }
            | ClientEvent::DebounceDispatch { timestamp, .. }
            | ClientEvent::RateLimitWait { timestamp, .. }
            | ClientEvent::RateLimitAdmit { timestamp, .. }
            | ClientEvent::HedgeLaunch { timestamp, .. }
            | ClientEvent::HedgeWin { timestamp, .. }
            | ClientEvent::HedgeCancel { timestamp, .. } => *timestamp,
        }
    }

    fn request_id(&self) -> RequestId {
        self.descriptor().id
    }
}
