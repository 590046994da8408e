//! The error value every failed call surfaces.
//!
//! Exactly six kinds exist; transport-native failures are wrapped on entry to
//! the pipeline, plugin raises are wrapped as [`ErrorKind::Plugin`], and
//! cancellations of any flavor surface as [`ErrorKind::Abort`]. Errors are
//! cheaply cloneable so the deduplicator can hand the same failure to every
//! follower and hedge racers can move results across channels.

use crate::cancel::CancelReason;
use crate::request::RequestSnapshot;
use crate::response::Response;
use crate::transport::TransportError;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport succeeded but the status was surfaced as a failure.
    Http,
    /// A declared timeout elapsed.
    Timeout,
    /// The call was cancelled before completing.
    Abort,
    /// The transport failed below the HTTP layer.
    Network,
    /// The response body could not be decoded as requested.
    Parse,
    /// A plugin hook raised.
    Plugin,
}

impl ErrorKind {
    /// Stable lowercase label used in events and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "http",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Abort => "abort",
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type of every fallible operation in this crate family.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    attempt: u32,
    cancel_reason: Option<CancelReason>,
    request: Option<Arc<RequestSnapshot>>,
    response: Option<Box<Response>>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempt: 1,
            cancel_reason: None,
            request: None,
            response: None,
            source: None,
        }
    }

    /// An HTTP-status failure; attach the response with [`Error::with_response`].
    pub fn http(status: StatusCode) -> Self {
        Self::new(
            ErrorKind::Http,
            format!(
                "server returned {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            ),
        )
    }

    /// A timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_cancel_reason(CancelReason::Timeout)
    }

    /// An abort failure carrying the cancellation reason.
    pub fn abort(reason: CancelReason) -> Self {
        Self::new(ErrorKind::Abort, reason.as_str()).with_cancel_reason(reason)
    }

    /// A transport-layer failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// A body-decoding failure.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// A plugin raise, wrapping the plugin's own error.
    pub fn plugin(plugin_name: &str, cause: Error) -> Self {
        Self {
            kind: ErrorKind::Plugin,
            message: format!("plugin {plugin_name:?} raised: {}", cause.message),
            attempt: cause.attempt,
            cancel_reason: cause.cancel_reason,
            request: cause.request.clone(),
            response: cause.response.clone(),
            source: Some(Arc::new(cause)),
        }
    }

    /// Wraps a transport error into the taxonomy.
    ///
    /// Raw I/O failures become [`ErrorKind::Network`] unless the racer's
    /// token fired with a timeout, in which case the caller passes that
    /// reason and the error becomes [`ErrorKind::Timeout`].
    pub fn from_transport(err: TransportError, fired: Option<CancelReason>) -> Self {
        match (err, fired) {
            (_, Some(CancelReason::Timeout)) => Self::timeout("request timed out"),
            (_, Some(reason)) => Self::abort(reason),
            (TransportError::Timeout, None) => Self::timeout("transport reported a timeout"),
            (TransportError::Network { message, source }, None) => {
                let mut error = Self::network(message);
                error.source = source;
                error
            }
        }
    }

    /// Sets the attempt number the error surfaced on (1-based).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Attaches the request snapshot.
    pub fn with_request(mut self, request: Arc<RequestSnapshot>) -> Self {
        self.request = Some(request);
        self
    }

    /// Attaches the response that accompanied the failure.
    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(Box::new(response));
        self
    }

    /// Attaches an underlying cause.
    pub fn with_source(mut self, source: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    /// Records the cancellation reason behind an abort or timeout.
    pub fn with_cancel_reason(mut self, reason: CancelReason) -> Self {
        self.cancel_reason = Some(reason);
        self
    }

    /// The failure classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempt number (1-based) the error surfaced on.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Why the call was cancelled, for abort-class errors.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    /// The request snapshot, when attached.
    pub fn request(&self) -> Option<&Arc<RequestSnapshot>> {
        self.request.as_ref()
    }

    /// The response that accompanied the failure, if any.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    /// Status of the accompanying response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|response| response.status)
    }

    /// True for [`ErrorKind::Http`].
    pub fn is_http(&self) -> bool {
        self.kind == ErrorKind::Http
    }

    /// True for [`ErrorKind::Timeout`].
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// True for [`ErrorKind::Abort`].
    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Abort
    }

    /// True for [`ErrorKind::Network`].
    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    /// True for [`ErrorKind::Parse`].
    pub fn is_parse(&self) -> bool {
        self.kind == ErrorKind::Parse
    }

    /// True for [`ErrorKind::Plugin`].
    pub fn is_plugin(&self) -> bool {
        self.kind == ErrorKind::Plugin
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if self.attempt > 1 {
            write!(f, " (attempt {})", self.attempt)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .field("cancel_reason", &self.cancel_reason)
            .field("status", &self.status())
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}
