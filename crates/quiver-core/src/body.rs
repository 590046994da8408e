//! Request body payloads and their wire encodings.

use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Error raised when a body cannot be encoded to bytes.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    /// JSON serialization failed.
    #[error("failed to encode JSON body: {0}")]
    Json(#[from] serde_json::Error),
    /// Form serialization failed.
    #[error("failed to encode form body: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),
}

/// A request payload.
///
/// Higher-level variants carry their shape until the moment of dispatch;
/// [`Body::encode`] produces the raw bytes the transport sees and
/// [`Body::content_type`] the matching `Content-Type`, which the facade
/// applies unless the caller set one explicitly.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No payload.
    #[default]
    Empty,
    /// Pre-encoded bytes; the caller owns the content type.
    Bytes(Bytes),
    /// Plain text, sent as `text/plain; charset=utf-8`.
    Text(String),
    /// A JSON document, sent as `application/json`.
    Json(serde_json::Value),
    /// URL-encoded key/value pairs, sent as
    /// `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// A `multipart/form-data` payload.
    Multipart(MultipartForm),
}

impl Body {
    /// Serializes `value` into a JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, BodyError> {
        Ok(Body::Json(serde_json::to_value(value)?))
    }

    /// True when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// The `Content-Type` implied by this payload, if any.
    pub fn content_type(&self) -> Option<String> {
        match self {
            Body::Empty | Body::Bytes(_) => None,
            Body::Text(_) => Some("text/plain; charset=utf-8".to_string()),
            Body::Json(_) => Some("application/json".to_string()),
            Body::Form(_) => Some("application/x-www-form-urlencoded".to_string()),
            Body::Multipart(form) => Some(format!(
                "multipart/form-data; boundary={}",
                form.boundary()
            )),
        }
    }

    /// Encodes the payload to wire bytes.
    pub fn encode(&self) -> Result<Bytes, BodyError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes.clone()),
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Body::Form(pairs) => Ok(Bytes::from(serde_urlencoded::to_string(pairs)?.into_bytes())),
            Body::Multipart(form) => Ok(form.encode()),
        }
    }

    /// A stable hash of the encoded payload, used in dedup and debounce keys.
    ///
    /// Encoding failures hash the variant discriminant only, which keeps key
    /// derivation total; the dispatch path surfaces the encoding error.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self.encode() {
            Ok(bytes) => bytes.hash(&mut hasher),
            Err(_) => std::mem::discriminant(self).hash(&mut hasher),
        }
        hasher.finish()
    }
}

/// One part of a [`MultipartForm`].
#[derive(Debug, Clone)]
pub struct MultipartPart {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// A `multipart/form-data` payload with a generated boundary.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<MultipartPart>,
}

impl MultipartForm {
    /// Creates an empty form with a fresh boundary.
    pub fn new() -> Self {
        Self {
            boundary: format!("quiver-{}", Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    /// The boundary separating parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Adds a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into().into_bytes()),
        });
        self
    }

    /// Adds a file field with an explicit content type.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        });
        self
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True when no parts were added.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(b"--");
            out.extend_from_slice(self.boundary.as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(b"Content-Disposition: form-data; name=\"");
            out.extend_from_slice(part.name.as_bytes());
            out.extend_from_slice(b"\"");
            if let Some(filename) = &part.filename {
                out.extend_from_slice(b"; filename=\"");
                out.extend_from_slice(filename.as_bytes());
                out.extend_from_slice(b"\"");
            }
            out.extend_from_slice(b"\r\n");
            if let Some(content_type) = &part.content_type {
                out.extend_from_slice(b"Content-Type: ");
                out.extend_from_slice(content_type.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
        Bytes::from(out)
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}
