//! The response record and response-body decoding.

use crate::error::Error;
use crate::request::RequestSnapshot;
use crate::transport::RawResponse;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;

/// How a response body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Sniff from the `Content-Type` header: JSON media types decode as
    /// JSON, everything else falls back to text (or raw bytes when the body
    /// is not UTF-8).
    #[default]
    Auto,
    /// UTF-8 text.
    Text,
    /// A JSON document.
    Json,
    /// XML, kept as text.
    Xml,
    /// HTML, kept as text.
    Html,
    /// Raw bytes.
    Blob,
    /// Raw bytes.
    ArrayBuffer,
    /// Raw bytes, unparsed.
    Stream,
    /// Newline-delimited JSON; blank lines are skipped.
    NdJson,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Zero-length body.
    Empty,
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// One JSON document.
    Json(serde_json::Value),
    /// One JSON document per line.
    NdJson(Vec<serde_json::Value>),
}

/// A completed response.
///
/// Only produced on non-error completion; error completions carry the same
/// request snapshot on the error value instead.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status.
    pub status: StatusCode,
    /// Canonical reason phrase for the status.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Decoded body.
    pub data: ResponseData,
    /// The request that produced this response, as last mutated.
    pub request: Arc<RequestSnapshot>,
}

impl Response {
    /// Decodes a transport-level response according to `hint`.
    pub fn from_raw(
        raw: RawResponse,
        hint: ResponseType,
        request: Arc<RequestSnapshot>,
    ) -> Result<Self, Error> {
        let data = decode_body(hint, &raw.headers, raw.body)
            .map_err(|err| err.with_request(Arc::clone(&request)))?;
        Ok(Self {
            status: raw.status,
            status_text: raw
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers: raw.headers,
            data,
            request,
        })
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserializes a JSON body into `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        let value = match &self.data {
            ResponseData::Json(value) => value.clone(),
            ResponseData::Text(text) => serde_json::from_str(text).map_err(|err| {
                Error::parse(format!("response body is not JSON: {err}"))
                    .with_request(Arc::clone(&self.request))
            })?,
            other => {
                return Err(Error::parse(format!(
                    "cannot deserialize {} body as JSON",
                    data_kind(other)
                ))
                .with_request(Arc::clone(&self.request)))
            }
        };
        serde_json::from_value(value).map_err(|err| {
            Error::parse(format!("JSON deserialization failed: {err}"))
                .with_request(Arc::clone(&self.request))
        })
    }

    /// The body as text, when it was decoded as text.
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The body as raw bytes, when it was kept raw.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.data {
            ResponseData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn data_kind(data: &ResponseData) -> &'static str {
    match data {
        ResponseData::Empty => "empty",
        ResponseData::Bytes(_) => "binary",
        ResponseData::Text(_) => "text",
        ResponseData::Json(_) => "json",
        ResponseData::NdJson(_) => "ndjson",
    }
}

fn content_type(headers: &HeaderMap) -> Option<mime::Mime> {
    headers
        .get(http::header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn is_json_media_type(mime: &mime::Mime) -> bool {
    mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON)
}

fn decode_body(hint: ResponseType, headers: &HeaderMap, body: Bytes) -> Result<ResponseData, Error> {
    if body.is_empty() {
        return Ok(ResponseData::Empty);
    }
    match hint {
        ResponseType::Blob | ResponseType::ArrayBuffer | ResponseType::Stream => {
            Ok(ResponseData::Bytes(body))
        }
        ResponseType::Text | ResponseType::Xml | ResponseType::Html => decode_text(body),
        ResponseType::Json => decode_json(&body),
        ResponseType::NdJson => decode_ndjson(&body),
        ResponseType::Auto => match content_type(headers) {
            Some(mime) if is_json_media_type(&mime) => decode_json(&body),
            Some(mime) if mime.essence_str() == "application/x-ndjson" => decode_ndjson(&body),
            _ => match String::from_utf8(body.to_vec()) {
                Ok(text) => Ok(ResponseData::Text(text)),
                Err(_) => Ok(ResponseData::Bytes(body)),
            },
        },
    }
}

fn decode_text(body: Bytes) -> Result<ResponseData, Error> {
    String::from_utf8(body.to_vec())
        .map(ResponseData::Text)
        .map_err(|_| Error::parse("response body is not valid UTF-8"))
}

fn decode_json(body: &[u8]) -> Result<ResponseData, Error> {
    serde_json::from_slice(body)
        .map(ResponseData::Json)
        .map_err(|err| Error::parse(format!("invalid JSON response: {err}")))
}

fn decode_ndjson(body: &[u8]) -> Result<ResponseData, Error> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::parse("NDJSON response body is not valid UTF-8"))?;
    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|err| {
            Error::parse(format!("invalid NDJSON on line {}: {err}", index + 1))
        })?;
        rows.push(value);
    }
    Ok(ResponseData::NdJson(rows))
}
