//! The transport boundary: the single external dependency the pipeline has.
//!
//! A transport takes a prepared [`Request`] and a [`CancelToken`] and yields a
//! raw response or a transport-level error. Everything above it (admission
//! control, retries, hedging, plugins) is this workspace; everything below it
//! (sockets, TLS, connection pooling) is the implementor's.

use crate::cancel::CancelToken;
use crate::request::Request;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Undecoded response as produced by a transport.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Complete response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Creates a response with empty headers and body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header, panicking on invalid values; intended for tests and
    /// in-process transports where values are static.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Debug,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Debug,
    {
        self.headers.insert(
            name.try_into().expect("valid header name"),
            value.try_into().expect("valid header value"),
        );
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Sets a JSON body and content type.
    pub fn with_json(self, value: serde_json::Value) -> Self {
        let body = Bytes::from(value.to_string().into_bytes());
        self.with_header(http::header::CONTENT_TYPE, "application/json")
            .with_body(body)
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The transport's own deadline elapsed.
    Timeout,
    /// Connection-level failure.
    Network {
        /// What went wrong.
        message: String,
        /// Underlying cause, if preserved.
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl TransportError {
    /// A network failure with a message only.
    pub fn network(message: impl Into<String>) -> Self {
        TransportError::Network {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "transport timed out"),
            TransportError::Network { message, .. } => write!(f, "transport failed: {message}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Network {
                source: Some(source),
                ..
            } => Some(source.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Network {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

/// Future returned by [`Transport::send`].
pub type TransportFuture = BoxFuture<'static, Result<RawResponse, TransportError>>;

/// The single method the pipeline requires of an HTTP implementation.
///
/// Implementations should observe `cancel` at their own suspension points; the
/// pipeline additionally races the returned future against the token, so a
/// transport that ignores it is still cancellable, just not promptly on the
/// wire.
pub trait Transport: Send + Sync + 'static {
    /// Performs one exchange.
    fn send(&self, req: Request, cancel: CancelToken) -> TransportFuture;
}

impl Transport for Arc<dyn Transport> {
    fn send(&self, req: Request, cancel: CancelToken) -> TransportFuture {
        self.as_ref().send(req, cancel)
    }
}

/// Adapts a closure into a [`Transport`].
///
/// The workhorse for tests and in-process fakes, in the same spirit as
/// `tower::service_fn`.
pub struct TransportFn<F> {
    f: F,
}

impl<F> fmt::Debug for TransportFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFn").finish_non_exhaustive()
    }
}

/// Creates a [`Transport`] from an async closure.
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(Request, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
{
    TransportFn { f }
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
{
    fn send(&self, req: Request, cancel: CancelToken) -> TransportFuture {
        Box::pin((self.f)(req, cancel))
    }
}
