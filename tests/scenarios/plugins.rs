//! Plugin pipeline scenarios.

use super::support::{ok_text, status, CallCounter};
use async_trait::async_trait;
use http::StatusCode;
use quiver_client::{Client, Context, Plugin, RequestOptions, RetryPolicy};
use quiver_core::{transport_fn, Error, RawResponse, Response, ResponseType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stamps a fresh token header on every attempt.
struct TokenRefresher {
    issued: AtomicUsize,
}

#[async_trait]
impl Plugin for TokenRefresher {
    fn name(&self) -> &str {
        "token-refresher"
    }

    async fn on_request(&self, ctx: &mut Context) -> Result<(), Error> {
        let token = self.issued.fetch_add(1, Ordering::SeqCst);
        ctx.req.headers.insert(
            "authorization",
            format!("Bearer token-{token}").parse().expect("valid header"),
        );
        ctx.meta.insert(
            "attempts_seen".to_string(),
            serde_json::json!(ctx.attempt),
        );
        Ok(())
    }
}

#[tokio::test]
async fn on_request_reruns_per_attempt_with_fresh_credentials() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let calls = CallCounter::new();

    let record = Arc::clone(&seen);
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |req, _cancel| {
            let record = Arc::clone(&record);
            let counter = counter.clone();
            async move {
                record.lock().push(
                    req.headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string(),
                );
                if counter.next() < 2 {
                    Ok(status(StatusCode::SERVICE_UNAVAILABLE))
                } else {
                    Ok(ok_text("authorized"))
                }
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(3)
                .fixed_backoff(Duration::from_millis(5))
                .build(),
        )
        .plugin(TokenRefresher {
            issued: AtomicUsize::new(0),
        })
        .build()
        .unwrap();

    client
        .get("https://api.example.com/private", RequestOptions::new())
        .await
        .unwrap();

    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            "Bearer token-0".to_string(),
            "Bearer token-1".to_string(),
            "Bearer token-2".to_string(),
        ]
    );
}

/// Converts a specific upstream failure into a canned fallback response.
struct FallbackOn503;

#[async_trait]
impl Plugin for FallbackOn503 {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn on_response_error(&self, ctx: &mut Context) -> Result<(), Error> {
        let is_503 = ctx
            .error
            .as_ref()
            .and_then(Error::status)
            .is_some_and(|code| code == StatusCode::SERVICE_UNAVAILABLE);
        if is_503 {
            let raw = RawResponse::new(StatusCode::OK)
                .with_header(http::header::CONTENT_TYPE, "text/plain")
                .with_body(bytes::Bytes::from_static(b"fallback"));
            ctx.res = Some(Response::from_raw(
                raw,
                ResponseType::Auto,
                ctx.req.snapshot(),
            )?);
            ctx.error = None;
        }
        Ok(())
    }
}

#[tokio::test]
async fn error_hook_recovery_turns_failure_into_success() {
    let client = Client::builder()
        .transport(transport_fn(|_req, _cancel| async {
            Ok(status(StatusCode::SERVICE_UNAVAILABLE))
        }))
        .plugin(FallbackOn503)
        .build()
        .unwrap();

    let response = client
        .get("https://api.example.com/flaky", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.text(), Some("fallback"));
}

struct PoisonedRequestHook;

#[async_trait]
impl Plugin for PoisonedRequestHook {
    fn name(&self) -> &str {
        "poisoned"
    }

    async fn on_request(&self, _ctx: &mut Context) -> Result<(), Error> {
        Err(Error::network("vault unreachable"))
    }
}

#[tokio::test]
async fn request_hook_failure_aborts_before_the_transport() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Ok(ok_text("unreachable"))
            }
        }))
        .plugin(PoisonedRequestHook)
        .build()
        .unwrap();

    let error = client
        .get("https://api.example.com/x", RequestOptions::new())
        .await
        .unwrap_err();

    assert!(error.is_plugin());
    assert!(error.message().contains("poisoned"));
    assert_eq!(calls.count(), 0);
}

struct ResponseValidator;

#[async_trait]
impl Plugin for ResponseValidator {
    fn name(&self) -> &str {
        "validator"
    }

    async fn on_response(&self, ctx: &mut Context) -> Result<(), Error> {
        let suspicious = ctx
            .res
            .as_ref()
            .and_then(Response::text)
            .is_some_and(|text| text.contains("corrupt"));
        if suspicious {
            return Err(Error::parse("body failed validation"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn response_hook_raise_routes_into_the_error_path() {
    let client = Client::builder()
        .transport(transport_fn(|_req, _cancel| async {
            Ok(ok_text("corrupt payload"))
        }))
        .plugin(ResponseValidator)
        .build()
        .unwrap();

    let error = client
        .get("https://api.example.com/x", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(error.is_plugin());
    assert!(error.message().contains("validator"));
}

/// Tracks how many attempts the call took via `ctx.meta`.
struct MetaProbe {
    final_attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for MetaProbe {
    fn name(&self) -> &str {
        "meta-probe"
    }

    async fn on_request(&self, ctx: &mut Context) -> Result<(), Error> {
        let prior = ctx
            .meta
            .get("attempt_log")
            .and_then(|value| value.as_array().cloned())
            .unwrap_or_default();
        let mut log = prior;
        log.push(serde_json::json!(ctx.attempt));
        ctx.meta
            .insert("attempt_log".to_string(), serde_json::Value::Array(log));
        Ok(())
    }

    async fn on_response(&self, ctx: &mut Context) -> Result<(), Error> {
        let count = ctx
            .meta
            .get("attempt_log")
            .and_then(|value| value.as_array())
            .map(Vec::len)
            .unwrap_or_default();
        self.final_attempts.store(count, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn meta_persists_across_attempts() {
    let final_attempts = Arc::new(AtomicUsize::new(0));
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                if counter.next() < 1 {
                    Ok(status(StatusCode::BAD_GATEWAY))
                } else {
                    Ok(ok_text("done"))
                }
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(2)
                .fixed_backoff(Duration::from_millis(5))
                .build(),
        )
        .plugin(MetaProbe {
            final_attempts: Arc::clone(&final_attempts),
        })
        .build()
        .unwrap();

    client
        .get("https://api.example.com/x", RequestOptions::new())
        .await
        .unwrap();

    // The meta map accumulated one entry per attempt.
    assert_eq!(final_attempts.load(Ordering::SeqCst), 2);
}
