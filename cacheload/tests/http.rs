//! Tests issuing requests against a real HTTP target.

use std::net::TcpListener;
use std::time::Duration;

use cacheload::http::{HttpTransport, RequestIssuer, fetch_cache_stats};
use cacheload::metrics::NO_STATUS;
use cacheload_test::server::{Behavior, TestTarget};
use reqwest::{StatusCode, Url};

fn issuer(base_url: &str, timeout: Duration) -> RequestIssuer<HttpTransport> {
    let base_url = Url::parse(base_url).unwrap();
    RequestIssuer::new(&base_url, HttpTransport::new(timeout).unwrap())
}

#[tokio::test]
async fn ok_response_passes_check() {
    cacheload_test::tracing::init();
    let target = TestTarget::new().await;
    let issuer = issuer(&target.base_url(), Duration::from_secs(5));

    let outcome = issuer.issue(42).await;
    assert_eq!(outcome.key, 42);
    assert_eq!(outcome.status, 200);
    assert!(outcome.succeeded);
    assert!(outcome.check_passed);
    assert!(outcome.latency > Duration::ZERO);

    assert_eq!(target.requests().get(&42), Some(&1));
}

#[tokio::test]
async fn target_serves_requested_key() {
    cacheload_test::tracing::init();
    let target = TestTarget::new().await;

    let response = reqwest::get(target.url("/api/hot?id=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "value-5");
    assert_eq!(target.requests().get(&5), Some(&1));
}

#[tokio::test]
async fn error_status_fails_only_the_check() {
    cacheload_test::tracing::init();
    let target = TestTarget::with_behavior(Behavior {
        status: StatusCode::SERVICE_UNAVAILABLE,
        ..Default::default()
    })
    .await;
    let issuer = issuer(&target.base_url(), Duration::from_secs(5));

    let outcome = issuer.issue(7).await;
    assert_eq!(outcome.status, 503);
    assert!(outcome.succeeded);
    assert!(!outcome.check_passed);
}

#[tokio::test]
async fn connection_refused_is_recorded() {
    cacheload_test::tracing::init();

    // reserve a port and close it again so nothing is listening
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let issuer = issuer(&format!("http://127.0.0.1:{port}"), Duration::from_secs(5));

    let outcome = issuer.issue(1).await;
    assert_eq!(outcome.status, NO_STATUS);
    assert!(!outcome.succeeded);
    assert!(!outcome.check_passed);
}

#[tokio::test]
async fn timeout_records_elapsed_time() {
    cacheload_test::tracing::init();
    let target = TestTarget::with_behavior(Behavior {
        delay: Duration::from_secs(2),
        ..Default::default()
    })
    .await;
    let timeout = Duration::from_millis(100);
    let issuer = issuer(&target.base_url(), timeout);

    let outcome = issuer.issue(3).await;
    assert_eq!(outcome.status, NO_STATUS);
    assert!(!outcome.succeeded);
    assert!(outcome.latency >= timeout);
    assert!(outcome.latency < Duration::from_secs(2));
}

#[tokio::test]
async fn reads_cache_stats() {
    cacheload_test::tracing::init();
    let target = TestTarget::new().await;
    let issuer = issuer(&target.base_url(), Duration::from_secs(5));
    for key in [1, 1, 1, 2] {
        issuer.issue(key).await;
    }

    let client = reqwest::Client::new();
    let base_url = Url::parse(&target.base_url()).unwrap();
    let stats = fetch_cache_stats(&client, &base_url).await.unwrap();

    assert_eq!(stats.request_count, 4);
    assert_eq!(stats.miss_count, 2);
    assert_eq!(stats.hit_count, 2);
    assert_eq!(stats.hit_rate, 0.5);
}
