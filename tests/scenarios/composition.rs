//! Full-stack composition: every subsystem enabled on one client.

use super::support::{ok_text, CallCounter, EventLog};
use bytes::Bytes;
use http::StatusCode;
use quiver_client::{
    Client, DebounceConfig, DedupConfig, HedgePolicy, RateLimitConfig, RequestOptions,
    RetryPolicy, TowerTransport,
};
use quiver_core::{transport_fn, RawResponse};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn full_stack_client(calls: &CallCounter, events: &EventLog) -> Client {
    let counter = calls.clone();
    Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                Ok(ok_text("stacked"))
            }
        }))
        .base_url(Url::parse("https://api.example.com/v1/").unwrap())
        .timeout(Duration::from_secs(2))
        .retry(
            RetryPolicy::builder()
                .max_retries(2)
                .fixed_backoff(Duration::from_millis(10))
                .build(),
        )
        .hedging(
            HedgePolicy::builder()
                .delay(Duration::from_millis(500))
                .max_hedges(1)
                .build(),
        )
        .rate_limit(
            RateLimitConfig::builder()
                .rate_per_sec(100.0)
                .burst(10.0)
                .build()
                .unwrap(),
        )
        .dedup(DedupConfig::builder().build())
        .debounce(
            DebounceConfig::builder()
                .delay(Duration::from_millis(20))
                .build(),
        )
        .tag("stack")
        .listener(events.listener())
        .build()
        .unwrap()
}

#[tokio::test]
async fn one_call_walks_the_whole_pipeline() {
    let calls = CallCounter::new();
    let events = EventLog::new();
    let client = full_stack_client(&calls, &events);

    let response = client.get("items", RequestOptions::new()).await.unwrap();
    assert_eq!(response.text(), Some("stacked"));
    assert_eq!(response.request.tags, vec!["stack".to_string()]);
    assert_eq!(calls.count(), 1);

    let types = events.types();
    let position = |event_type: &str| {
        types
            .iter()
            .position(|logged| logged == event_type)
            .unwrap_or_else(|| panic!("missing {event_type} in {types:?}"))
    };

    // Admission stages run in pipeline order, then the exchange completes.
    assert!(position("request:start") < position("ratelimit:admit"));
    assert!(position("ratelimit:admit") < position("debounce:dispatch"));
    assert!(position("debounce:dispatch") < position("dedup:miss"));
    assert!(position("dedup:miss") < position("request:success"));
}

#[tokio::test]
async fn typed_helpers_round_trip() {
    let client = Client::builder()
        .transport(transport_fn(|req, _cancel| async move {
            let path = req.url.path().to_string();
            match path.as_str() {
                "/json" => Ok(RawResponse::new(StatusCode::OK)
                    .with_json(serde_json::json!({"name": "quiver", "stars": 7}))),
                "/ndjson" => Ok(RawResponse::new(StatusCode::OK)
                    .with_header(http::header::CONTENT_TYPE, "application/x-ndjson")
                    .with_body(Bytes::from_static(b"{\"n\":1}\n{\"n\":2}\n"))),
                "/echo-form" => {
                    let body = req.body.encode().expect("form encodes");
                    Ok(RawResponse::new(StatusCode::OK)
                        .with_header(http::header::CONTENT_TYPE, "text/plain")
                        .with_body(body))
                }
                "/soap" => {
                    assert_eq!(
                        req.headers
                            .get(http::header::CONTENT_TYPE)
                            .and_then(|value| value.to_str().ok()),
                        Some("text/xml; charset=utf-8")
                    );
                    Ok(RawResponse::new(StatusCode::OK)
                        .with_header(http::header::CONTENT_TYPE, "text/xml")
                        .with_body(Bytes::from_static(b"<ok/>")))
                }
                other => panic!("unexpected path {other}"),
            }
        }))
        .build()
        .unwrap();

    #[derive(serde::Deserialize)]
    struct Repo {
        name: String,
        stars: u32,
    }
    let repo: Repo = client.get_json("https://api.example.com/json").await.unwrap();
    assert_eq!(repo.name, "quiver");
    assert_eq!(repo.stars, 7);

    let rows = client
        .get_ndjson("https://api.example.com/ndjson")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let echoed = client
        .post_form(
            "https://api.example.com/echo-form",
            [("q", "hello world"), ("page", "2")],
        )
        .await
        .unwrap();
    assert_eq!(echoed.text(), Some("q=hello+world&page=2"));

    let soap = client
        .post_soap("https://api.example.com/soap", "<envelope/>")
        .await
        .unwrap();
    assert_eq!(soap.text(), Some("<ok/>"));
}

#[tokio::test]
async fn tower_service_stacks_plug_in_as_transports() {
    let transport = TowerTransport::new(tower::service_fn(
        |req: quiver_core::Request| async move {
            Ok::<_, quiver_core::TransportError>(
                RawResponse::new(StatusCode::OK)
                    .with_header(http::header::CONTENT_TYPE, "text/plain")
                    .with_body(Bytes::from(format!("via tower: {}", req.url.path()))),
            )
        },
    ));

    let client = Client::builder()
        .transport(transport)
        .retry(
            RetryPolicy::builder()
                .max_retries(1)
                .fixed_backoff(Duration::from_millis(5))
                .build(),
        )
        .build()
        .unwrap();

    let response = client
        .get("https://api.example.com/through", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.text(), Some("via tower: /through"));
}

#[tokio::test]
async fn empty_plugin_chain_is_transparent() {
    let client = Client::builder()
        .transport(transport_fn(|req, _cancel| async move {
            // The transport sees exactly what the caller configured.
            assert_eq!(req.headers.get("x-probe").unwrap(), "1");
            assert_eq!(req.url.query(), Some("a=1"));
            Ok(ok_text("clean"))
        }))
        .build()
        .unwrap();

    let response = client
        .get(
            "https://api.example.com/probe",
            RequestOptions::new().header("x-probe", "1").query("a", "1"),
        )
        .await
        .unwrap();
    assert_eq!(response.text(), Some("clean"));
}

#[tokio::test]
async fn clones_share_admission_state() {
    let calls = CallCounter::new();
    let counter = calls.clone();
    let client = Client::builder()
        .transport(transport_fn(move |_req, _cancel| {
            let counter = counter.clone();
            async move {
                counter.next();
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(ok_text("one"))
            }
        }))
        .dedup(DedupConfig::builder().build())
        .build()
        .unwrap();

    let clone = client.clone();
    let first = tokio::spawn(async move {
        client
            .get("https://api.example.com/shared", RequestOptions::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn(async move {
        clone
            .get("https://api.example.com/shared", RequestOptions::new())
            .await
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(calls.count(), 1);
}
