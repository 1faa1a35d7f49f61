//! Blackbox tests running complete load tests against an in-process target.

use std::time::Duration;

use cacheload::config::Config;
use cacheload::metrics::LatencyMode;
use cacheload::report::Thresholds;
use cacheload::schedule::Stage;
use cacheload_test::server::{Behavior, TestTarget};
use reqwest::StatusCode;

fn short_run(base_url: String) -> Config {
    Config {
        base_url,
        stages: vec![
            Stage::new(Duration::from_millis(500), 4),
            Stage::new(Duration::from_millis(500), 4),
        ],
        thresholds: Thresholds {
            min_qps: 1.0,
            p99_latency: Duration::from_secs(5),
            ..Default::default()
        },
        request_timeout: Duration::from_secs(5),
        seed: Some(7),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn healthy_target_passes() {
    cacheload_test::tracing::init();
    let target = TestTarget::new().await;
    let tempdir = tempfile::tempdir().unwrap();
    let summary = tempdir.path().join("summary.json");

    let config = Config {
        summary_export: Some(summary.clone()),
        ..short_run(target.base_url())
    };
    let report = cacheload::run(&config).await.unwrap();

    assert!(report.total_requests > 0);
    assert_eq!(report.total_requests, target.request_count());
    assert_eq!(report.failed_requests, 0);
    assert_eq!(report.check_pass_rate, 1.0);
    assert_eq!(report.peak_callers, 4);
    assert!(report.latency.is_some());
    assert!(report.passed(), "{report}");

    // every requested key comes from the configured intervals
    assert!(target.requests().keys().all(|key| (1..=1000).contains(key)));

    let cache = report.cache_stats.as_ref().unwrap();
    assert_eq!(cache.request_count, report.total_requests);

    let exported: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&summary).unwrap()).unwrap();
    assert_eq!(exported["total_requests"], report.total_requests);
    assert_eq!(exported["verdict"]["error_rate"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn error_status_fails_checks_but_not_transport() {
    cacheload_test::tracing::init();
    let target = TestTarget::with_behavior(Behavior {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Default::default()
    })
    .await;

    let config = Config {
        latency: LatencyMode::Sketch,
        cache_stats: false,
        ..short_run(target.base_url())
    };
    let report = cacheload::run(&config).await.unwrap();

    assert!(report.total_requests > 0);
    assert_eq!(report.error_rate, 0.0);
    assert_eq!(report.check_pass_rate, 0.0);
    assert_eq!(report.status_counts, vec![(500, report.total_requests)]);
    assert!(report.latency.unwrap().approximate);
    assert!(report.cache_stats.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_target_is_reported_not_raised() {
    cacheload_test::tracing::init();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let report = cacheload::run(&short_run(format!("http://127.0.0.1:{port}")))
        .await
        .unwrap();

    assert!(report.total_requests > 0);
    assert_eq!(report.failed_requests, report.total_requests);
    assert_eq!(report.error_rate, 1.0);
    assert!(!report.verdict.error_rate);
    assert!(!report.passed());
    assert!(report.cache_stats.is_none());
}

#[tokio::test]
async fn invalid_config_fails_before_running() {
    let config = Config {
        base_url: "not a url".to_owned(),
        ..Default::default()
    };

    let err = cacheload::run(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("invalid base URL"), "{err:#}");
}
