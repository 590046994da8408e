//! `Retry-After` header handling.

use http::HeaderMap;
use std::time::{Duration, SystemTime};

/// Parses a `Retry-After` header into a delay.
///
/// Accepts the delta-seconds form and the HTTP-date (RFC 1123) form. A date
/// already in the past yields a zero delay. Negative seconds, garbage, or a
/// missing header yield `None`, letting the caller fall through to its
/// backoff strategy.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64));
    }

    let instant = httpdate::parse_http_date(trimmed).ok()?;
    Some(
        instant
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
