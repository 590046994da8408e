//! Cancellation and timeout scenarios.

use super::support::{ok_text, status, transport_sleep, CallCounter, EventLog};
use http::StatusCode;
use quiver_client::{CancelReason, CancelSource, Client, RateLimitConfig, RequestOptions, RetryPolicy};
use quiver_core::transport_fn;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn cancellation_during_backoff_aborts_without_another_attempt() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Arc::new(
        Client::builder()
            .transport(transport_fn(move |_req, _cancel| {
                let counter = counter.clone();
                async move {
                    counter.next();
                    Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }))
            .retry(
                RetryPolicy::builder()
                    .max_retries(5)
                    .fixed_backoff(Duration::from_millis(1000))
                    .build(),
            )
            .build()
            .unwrap(),
    );

    let cancel = CancelSource::new();
    let call = {
        let client = Arc::clone(&client);
        let signal = cancel.token();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = client
                .get(
                    "https://api.example.com/failing",
                    RequestOptions::new().signal(signal),
                )
                .await;
            (result, started.elapsed())
        })
    };

    // Fire 300 ms into the first 1000 ms backoff.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fired_at = Instant::now();
    cancel.fire(CancelReason::User);

    let (result, elapsed) = call.await.unwrap();
    let error = result.unwrap_err();

    assert!(error.is_abort());
    assert_eq!(error.attempt(), 1);
    assert_eq!(calls.count(), 1);
    // The sleeper woke promptly, well before the backoff would have elapsed.
    assert!(fired_at.elapsed() < Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test]
async fn cancellation_while_queued_on_the_rate_limiter() {
    let client = Arc::new(
        Client::builder()
            .transport(transport_fn(|_req, _cancel| async { Ok(ok_text("ok")) }))
            .rate_limit(
                RateLimitConfig::builder()
                    .rate_per_sec(0.5)
                    .burst(1.0)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    );

    // Drain the bucket.
    client
        .get("https://api.example.com/x", RequestOptions::new())
        .await
        .unwrap();

    let cancel = CancelSource::new();
    let queued = {
        let client = Arc::clone(&client);
        let signal = cancel.token();
        tokio::spawn(async move {
            client
                .get(
                    "https://api.example.com/x",
                    RequestOptions::new().signal(signal),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.fire(CancelReason::User);

    let error = queued.await.unwrap().unwrap_err();
    assert!(error.is_abort());
    assert_eq!(error.cancel_reason(), Some(CancelReason::User));
}

#[tokio::test]
async fn prefired_signal_never_reaches_the_transport() {
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
        .build()
        .unwrap();

    let cancel = CancelSource::new();
    cancel.fire(CancelReason::User);

    let error = client
        .get(
            "https://api.example.com/x",
            RequestOptions::new().signal(cancel.token()),
        )
        .await
        .unwrap_err();

    assert!(error.is_abort());
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn per_attempt_timeout_surfaces_timeout_kind() {
    let client = Client::builder()
        .transport(transport_fn(|_req, cancel| async move {
            transport_sleep(Duration::from_secs(5), &cancel).await?;
            Ok(ok_text("too late"))
        }))
        .build()
        .unwrap();

    let started = Instant::now();
    let error = client
        .get(
            "https://api.example.com/slow",
            RequestOptions::new().timeout(Duration::from_millis(80)),
        )
        .await
        .unwrap_err();

    assert!(error.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn zero_timeout_never_fires() {
    let client = Client::builder()
        .transport(transport_fn(|_req, _cancel| async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(ok_text("slow but fine"))
        }))
        // Aggressive client default, disabled per call.
        .timeout(Duration::from_millis(20))
        .build()
        .unwrap();

    let response = client
        .get(
            "https://api.example.com/slow",
            RequestOptions::new().timeout(Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(response.text(), Some("slow but fine"));
}

#[tokio::test]
async fn timeouts_are_retried_for_idempotent_methods() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, cancel| {
            let counter = counter.clone();
            async move {
                if counter.next() == 0 {
                    transport_sleep(Duration::from_secs(5), &cancel).await?;
                }
                Ok(ok_text("second try"))
            }
        }))
        .timeout(Duration::from_millis(60))
        .retry(
            RetryPolicy::builder()
                .max_retries(2)
                .fixed_backoff(Duration::from_millis(10))
                .build(),
        )
        .listener(events.listener())
        .build()
        .unwrap();

    let response = client
        .get("https://api.example.com/flaky", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.text(), Some("second try"));
    assert_eq!(calls.count(), 2);
    assert_eq!(events.count_of("request:retry"), 1);
}
