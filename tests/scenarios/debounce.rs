//! Debouncer scenarios.

use super::support::{ok_text, CallCounter, EventLog};
use quiver_client::{CancelReason, Client, DebounceConfig, RequestOptions};
use quiver_core::transport_fn;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn debounced_client(window: Duration, calls: &CallCounter, events: &EventLog) -> Client {
    let counter = calls.clone();
    Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Ok(ok_text("dispatched"))
            }
        }))
        .debounce(DebounceConfig::builder().delay(window).build())
        .listener(events.listener())
        .build()
        .unwrap()
}

#[tokio::test]
async fn a_burst_collapses_to_the_final_request() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = Arc::new(debounced_client(
        Duration::from_millis(300),
        &calls,
        &events,
    ));

    let started = Instant::now();
    let mut handles = Vec::new();
    for index in 0..5 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let result = client
                .get("https://api.example.com/search", RequestOptions::new())
                .await;
            (index, result, started.elapsed())
        }));
        if index < 4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    let mut winner_elapsed = None;
    for handle in handles {
        let (index, result, elapsed) = handle.await.unwrap();
        if index == 4 {
            result.unwrap();
            winner_elapsed = Some(elapsed);
        } else {
            let error = result.unwrap_err();
            assert!(error.is_abort(), "request {index} should be debounced");
            assert_eq!(error.cancel_reason(), Some(CancelReason::Debounced));
        }
    }

    assert_eq!(calls.count(), 1);
    // The fifth enqueued at ~200 ms and dispatched ~300 ms later.
    let winner_elapsed = winner_elapsed.unwrap();
    assert!(winner_elapsed >= Duration::from_millis(450));
    assert!(winner_elapsed < Duration::from_millis(900));
    assert_eq!(events.count_of("debounce:cancel"), 4);
    assert_eq!(events.count_of("debounce:dispatch"), 1);
}

#[tokio::test]
async fn per_call_opt_out_skips_the_window() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = debounced_client(Duration::from_millis(400), &calls, &events);

    let started = Instant::now();
    client
        .get(
            "https://api.example.com/now",
            RequestOptions::new().no_debounce(),
        )
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(events.count_of("debounce:dispatch"), 0);
}

#[tokio::test]
async fn per_call_window_override_applies() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = debounced_client(Duration::from_millis(500), &calls, &events);

    let started = Instant::now();
    client
        .get(
            "https://api.example.com/fast",
            RequestOptions::new().debounce_delay(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < Duration::from_millis(300));
}

#[tokio::test]
async fn cancellation_before_the_timer_clears_the_entry() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = Arc::new(debounced_client(
        Duration::from_millis(300),
        &calls,
        &events,
    ));

    let cancel = quiver_core::CancelSource::new();
    let pending = {
        let client = Arc::clone(&client);
        let signal = cancel.token();
        tokio::spawn(async move {
            client
                .get(
                    "https://api.example.com/cancelme",
                    RequestOptions::new().signal(signal),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.fire(CancelReason::User);

    let error = pending.await.unwrap().unwrap_err();
    assert!(error.is_abort());
    assert_eq!(error.cancel_reason(), Some(CancelReason::User));
    assert_eq!(calls.count(), 0);
}
