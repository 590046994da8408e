//! Shared mock transports and event capture for the scenario tests.

use bytes::Bytes;
use http::StatusCode;
use quiver_client::{ClientEvent, FnListener, StatsEvent};
use quiver_core::{CancelToken, RawResponse, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts transport calls across clones.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments and returns the pre-increment count (0 for the first call).
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records every emitted event type, in order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<parking_lot::Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> FnListener<ClientEvent, impl Fn(&ClientEvent) + Send + Sync> {
        let log = Arc::clone(&self.0);
        FnListener::new(move |event: &ClientEvent| {
            log.lock().push(event.event_type().to_string());
        })
    }

    pub fn types(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|logged| logged.as_str() == event_type)
            .count()
    }
}

/// An OK response with a text body.
pub fn ok_text(marker: &str) -> RawResponse {
    RawResponse::new(StatusCode::OK)
        .with_header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .with_body(Bytes::copy_from_slice(marker.as_bytes()))
}

/// A bare status response.
pub fn status(code: StatusCode) -> RawResponse {
    RawResponse::new(code)
}

/// Sleeps while honoring the transport's cancellation token, the way a real
/// socket-backed transport would bail out mid-exchange.
pub async fn transport_sleep(
    duration: Duration,
    cancel: &CancelToken,
) -> Result<(), TransportError> {
    tokio::select! {
        reason = cancel.cancelled() => Err(TransportError::network(format!(
            "exchange torn down: {reason}"
        ))),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
