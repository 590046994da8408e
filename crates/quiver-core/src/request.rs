//! The request record that flows through the pipeline.

use crate::body::Body;
use crate::response::ResponseType;
use http::{HeaderMap, Method};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Identifier assigned to each user-visible call, carried by every stats
/// event the call emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A prepared request.
///
/// This is the record plugins mutate and the transport reads. Policy
/// sub-objects (retry, hedging, dedup, debounce) live on the resolved call,
/// not here; by the time a `Request` exists the configuration has been
/// resolved and the query merged into [`Request::url`].
#[derive(Debug, Clone)]
pub struct Request {
    /// Call identifier, stable across retries and hedges of one call.
    pub id: RequestId,
    /// Uppercase HTTP method.
    pub method: Method,
    /// Absolute URL with the query already merged.
    pub url: Url,
    /// Header map; keys are case-insensitive by construction.
    pub headers: HeaderMap,
    /// Payload.
    pub body: Body,
    /// Per-attempt deadline. `None` means no timeout.
    pub timeout: Option<Duration>,
    /// How the response body should be decoded.
    pub response_type: ResponseType,
    /// Labels propagated into stats events.
    pub tags: Vec<String>,
}

impl Request {
    /// Creates a request with empty headers and body and no timeout.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            timeout: None,
            response_type: ResponseType::Auto,
            tags: Vec::new(),
        }
    }

    /// Host component of the URL, or empty for host-less URLs.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The endpoint key: method plus path, query stripped.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.url.path())
    }

    /// Cheap descriptor carried by stats events.
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor {
            id: self.id,
            method: self.method.clone(),
            host: self.host().to_string(),
            endpoint: self.endpoint(),
            tags: self.tags.clone(),
        }
    }

    /// Immutable snapshot attached to responses and errors.
    pub fn snapshot(&self) -> Arc<RequestSnapshot> {
        Arc::new(RequestSnapshot {
            id: self.id,
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            tags: self.tags.clone(),
        })
    }
}

/// Identity of a request as carried by stats events.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Call identifier.
    pub id: RequestId,
    /// HTTP method.
    pub method: Method,
    /// URL host.
    pub host: String,
    /// Method + path, query stripped.
    pub endpoint: String,
    /// Labels for stats grouping.
    pub tags: Vec<String>,
}

/// Frozen view of the request that produced a response or error.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// Call identifier.
    pub id: RequestId,
    /// HTTP method.
    pub method: Method,
    /// Effective URL.
    pub url: Url,
    /// Headers as last mutated before dispatch.
    pub headers: HeaderMap,
    /// Labels for stats grouping.
    pub tags: Vec<String>,
}
