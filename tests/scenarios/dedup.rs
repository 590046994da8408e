//! Deduplicator scenarios.

use super::support::{ok_text, CallCounter, EventLog};
use quiver_client::{Client, DedupConfig, DedupKeyStrategy, RequestOptions};
use quiver_core::transport_fn;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn coalescing_client(delay: Duration, calls: &CallCounter, events: &EventLog) -> Client {
    let counter = calls.clone();
    Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                tokio::time::sleep(delay).await;
                Ok(ok_text("shared"))
            }
        }))
        .dedup(
            DedupConfig::builder()
                .name("test")
                .key_strategy(DedupKeyStrategy::Url)
                .build(),
        )
        .listener(events.listener())
        .build()
        .unwrap()
}

#[tokio::test]
async fn concurrent_identical_gets_coalesce_to_one_transport_call() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = Arc::new(coalescing_client(
        Duration::from_millis(100),
        &calls,
        &events,
    ));

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .get("https://api.example.com/slow", RequestOptions::new())
                .await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.text(), Some("shared"));
    }

    assert_eq!(calls.count(), 1);
    // All three resolved off one ~100 ms exchange.
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(events.count_of("dedup:miss"), 1);
    assert_eq!(events.count_of("dedup:hit"), 2);
    assert_eq!(events.count_of("request:success"), 3);
}

#[tokio::test]
async fn different_urls_do_not_coalesce() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = Arc::new(coalescing_client(Duration::from_millis(50), &calls, &events));

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(
            async move { client.get("https://api.example.com/a", RequestOptions::new()).await },
        )
    };
    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(
            async move { client.get("https://api.example.com/b", RequestOptions::new()).await },
        )
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn post_is_not_deduplicated_by_default() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = Arc::new(coalescing_client(Duration::from_millis(50), &calls, &events));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .post("https://api.example.com/submit", RequestOptions::new())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn ttl_cache_short_circuits_within_the_window() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Ok(ok_text("cachable"))
            }
        }))
        .dedup(
            DedupConfig::builder()
                .cache_ttl(Duration::from_millis(150))
                .build(),
        )
        .build()
        .unwrap();

    for _ in 0..3 {
        let response = client
            .get("https://api.example.com/cached", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(response.text(), Some("cachable"));
    }
    assert_eq!(calls.count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    client
        .get("https://api.example.com/cached", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn leader_error_propagates_to_followers() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Arc::new(
        Client::builder()
            .transport(transport_fn(move |_req, _cancel| {
                let counter = counter.clone();
                async move {
                    counter.next();
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Err::<quiver_core::RawResponse, _>(quiver_core::TransportError::network(
                        "backend down",
                    ))
                }
            }))
            .dedup(DedupConfig::builder().build())
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .get("https://api.example.com/down", RequestOptions::new())
                .await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for handle in handles {
        let error = handle.await.unwrap().unwrap_err();
        assert!(error.is_network());
        assert!(error.message().contains("backend down"));
    }
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn follower_cancellation_does_not_kill_the_leader() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Arc::new(
        Client::builder()
            .transport(transport_fn(move |_req, _cancel| {
                let counter = counter.clone();
                async move {
                    counter.next();
                    tokio::time::sleep(Duration::from_millis(120)).await;
                    Ok(ok_text("survived"))
                }
            }))
            .dedup(DedupConfig::builder().build())
            .build()
            .unwrap(),
    );

    let leader = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .get("https://api.example.com/x", RequestOptions::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let follower_cancel = quiver_core::CancelSource::new();
    let follower = {
        let client = Arc::clone(&client);
        let signal = follower_cancel.token();
        tokio::spawn(async move {
            client
                .get(
                    "https://api.example.com/x",
                    RequestOptions::new().signal(signal),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    follower_cancel.fire(quiver_core::CancelReason::User);

    let follower_result = follower.await.unwrap();
    assert!(follower_result.unwrap_err().is_abort());

    let leader_result = leader.await.unwrap().unwrap();
    assert_eq!(leader_result.text(), Some("survived"));
    assert_eq!(calls.count(), 1);
}
