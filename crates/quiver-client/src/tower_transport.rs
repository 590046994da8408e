//! Adapter for using a `tower::Service` stack as the transport.

use quiver_core::{CancelToken, RawResponse, Request, Transport, TransportError, TransportFuture};
use tower::ServiceExt;
use tower_service::Service;

/// Wraps any `tower::Service` over [`Request`] as a [`Transport`].
///
/// The service is cloned per exchange and driven with `oneshot`, so mock
/// transports built from `tower::service_fn` plug in directly. Cancellation
/// is drop-based: when the token fires, the pipeline drops the in-flight
/// future, which relies on the service supporting cooperative cancellation.
#[derive(Debug, Clone)]
pub struct TowerTransport<S> {
    service: S,
}

impl<S> TowerTransport<S> {
    /// Wraps `service`.
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S> Transport for TowerTransport<S>
where
    S: Service<Request, Response = RawResponse, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    fn send(&self, req: Request, _cancel: CancelToken) -> TransportFuture {
        let service = self.service.clone();
        Box::pin(service.oneshot(req))
    }
}
