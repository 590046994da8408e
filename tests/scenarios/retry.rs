//! Retry orchestrator scenarios.

use super::support::{ok_text, status, CallCounter, EventLog};
use http::{Method, StatusCode};
use quiver_client::{Client, RequestOptions, RetryPolicy};
use quiver_core::transport_fn;
use std::time::{Duration, Instant};

#[tokio::test]
async fn retry_eventually_succeeds() {
    let calls = CallCounter::new();
    let events = EventLog::new();

    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                if counter.next() < 2 {
                    Ok(status(StatusCode::SERVICE_UNAVAILABLE))
                } else {
                    Ok(ok_text("finally"))
                }
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(3)
                .linear_backoff(Duration::from_millis(50))
                .build(),
        )
        .listener(events.listener())
        .build()
        .unwrap();

    let started = Instant::now();
    let response = client
        .get("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), Some("finally"));
    assert_eq!(calls.count(), 3);
    assert_eq!(events.count_of("request:retry"), 2);
    assert_eq!(events.count_of("request:success"), 1);
    // Two backoffs: 50ms + 100ms.
    assert!(started.elapsed() >= Duration::from_millis(140));
}

#[tokio::test]
async fn retry_disabled_yields_exactly_one_attempt() {
    for retry in [quiver_client::RetrySetting::Disabled, 0u32.into()] {
        let calls = CallCounter::new();
        let counter = calls.clone();
        let client = Client::builder()
            .transport(transport_fn(move |_req, _cancel| {
                let counter = counter.clone();
                async move {
                    counter.next();
                    Ok(status(StatusCode::SERVICE_UNAVAILABLE))
                }
            }))
            .build()
            .unwrap();

        let mut options = RequestOptions::new();
        options.retry = Some(retry);
        let error = client
            .get("https://api.example.com/items", options)
            .await
            .unwrap_err();

        assert!(error.is_http());
        assert_eq!(error.attempt(), 1);
        assert_eq!(calls.count(), 1);
    }
}

#[tokio::test]
async fn non_idempotent_methods_do_not_retry_network_errors() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Err::<quiver_core::RawResponse, _>(quiver_core::TransportError::network(
                    "connection reset",
                ))
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(5)
                .fixed_backoff(Duration::from_millis(5))
                .build(),
        )
        .build()
        .unwrap();

    let error = client
        .post("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(error.is_network());
    assert_eq!(calls.count(), 1);

    // The same failure on a GET is retried to exhaustion.
    let error = client
        .get("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(error.is_network());
    assert_eq!(error.attempt(), 6);
    assert_eq!(calls.count(), 1 + 6);
}

#[tokio::test]
async fn retry_after_header_overrides_backoff() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                if counter.next() == 0 {
                    Ok(status(StatusCode::TOO_MANY_REQUESTS)
                        .with_header(http::header::RETRY_AFTER, "1"))
                } else {
                    Ok(ok_text("after throttle"))
                }
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(2)
                .fixed_backoff(Duration::from_millis(10))
                .build(),
        )
        .build()
        .unwrap();

    let started = Instant::now();
    let response = client
        .get("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.text(), Some("after throttle"));
    // The server asked for a 1 s pause; the 10 ms backoff did not apply.
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn exhaustion_reports_the_final_attempt() {
    let client = Client::builder()
        .transport(transport_fn(|_req, _cancel| async {
            Ok(status(StatusCode::BAD_GATEWAY))
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(2)
                .fixed_backoff(Duration::from_millis(5))
                .build(),
        )
        .build()
        .unwrap();

    let error = client
        .get("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap_err();

    assert!(error.is_http());
    assert_eq!(error.status(), Some(StatusCode::BAD_GATEWAY));
    assert_eq!(error.attempt(), 3);
}

#[tokio::test]
async fn ignore_response_error_returns_the_status() {
    let client = Client::builder()
        .transport(transport_fn(|_req, _cancel| async {
            Ok(status(StatusCode::IM_A_TEAPOT))
        }))
        .retry(3u32)
        .build()
        .unwrap();

    let response = client
        .get(
            "https://api.example.com/items",
            RequestOptions::new().ignore_response_error(true),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn user_predicate_replaces_the_default_decision() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Ok(status(StatusCode::SERVICE_UNAVAILABLE))
            }
        }))
        .retry(
            RetryPolicy::builder()
                .max_retries(4)
                .fixed_backoff(Duration::from_millis(1))
                .retry_when(|error| error.is_network())
                .build(),
        )
        .build()
        .unwrap();

    // 503 is retryable by default, but the predicate only accepts network
    // failures, so the call fails on the first attempt.
    let error = client
        .get("https://api.example.com/items", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(error.is_http());
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn method_helpers_carry_their_methods() {
    let client = Client::builder()
        .transport(transport_fn(|req, _cancel| async move {
            Ok(ok_text(req.method.as_str()))
        }))
        .build()
        .unwrap();

    for (expected, response) in [
        (
            Method::PUT,
            client
                .put("https://api.example.com/x", RequestOptions::new())
                .await
                .unwrap(),
        ),
        (
            Method::PATCH,
            client
                .patch("https://api.example.com/x", RequestOptions::new())
                .await
                .unwrap(),
        ),
        (
            Method::DELETE,
            client
                .delete("https://api.example.com/x", RequestOptions::new())
                .await
                .unwrap(),
        ),
        (
            Method::HEAD,
            client
                .head("https://api.example.com/x", RequestOptions::new())
                .await
                .unwrap(),
        ),
        (
            Method::OPTIONS,
            client
                .options("https://api.example.com/x", RequestOptions::new())
                .await
                .unwrap(),
        ),
    ] {
        assert_eq!(response.text(), Some(expected.as_str()));
    }
}
