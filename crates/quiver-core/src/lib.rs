//! Core vocabulary for the quiver HTTP client family.
//!
//! This crate holds what every pattern crate shares: the request/response
//! records, the six-kind error taxonomy, composable cancellation, the stats
//! event bus, and the transport boundary. It has no opinion on admission
//! control or reliability; those live in the sibling crates and are wired
//! together by `quiver-client`.

#![forbid(unsafe_code)]

mod body;
mod cancel;
mod error;
mod events;
mod request;
mod response;
mod transport;

pub use body::{Body, BodyError, MultipartForm, MultipartPart};
pub use cancel::{CancelReason, CancelSource, CancelToken, Cancelled};
pub use error::{Error, ErrorKind};
pub use events::{
    BoxedEventListener, ClientEvent, EventListener, EventListeners, FnListener, StatsEvent,
    StatsListeners,
};
pub use request::{Request, RequestDescriptor, RequestId, RequestSnapshot};
pub use response::{Response, ResponseData, ResponseType};
pub use transport::{transport_fn, RawResponse, Transport, TransportError, TransportFn, TransportFuture};
