//! Runs a configured load test end to end and produces its report.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::driver::LoadDriver;
use crate::http::{HttpTransport, RequestIssuer, fetch_cache_stats};
use crate::report::Report;

/// Drives the target with the configured schedule and evaluates the results.
///
/// The configuration is validated before the first request. When enabled, the target's cache
/// statistics are fetched after all callers have stopped, and the report is exported as JSON.
pub async fn run(config: &Config) -> Result<Report> {
    config.validate().context("invalid configuration")?;
    let base_url = config.base_url()?;
    let keys = config.key_range()?;
    let schedule = config.schedule()?;

    let transport = HttpTransport::new(config.request_timeout)?;
    let client = transport.client().clone();
    let issuer = RequestIssuer::new(&base_url, transport);

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message("Running load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    tracing::info!(target_url = %base_url, "running load test");
    let mut driver = LoadDriver::new(issuer, keys, schedule)
        .tick(config.tick_interval)
        .latency_mode(config.latency)
        .progress(bar);
    if let Some(seed) = config.seed {
        driver = driver.seed(seed);
    }
    let result = driver.run().await;

    let mut report = Report::new(&result.statistics, &config.thresholds);
    if config.cache_stats {
        match fetch_cache_stats(&client, &base_url).await {
            Ok(stats) => report = report.with_cache_stats(stats),
            Err(err) => tracing::warn!(
                error = &*err as &dyn std::error::Error,
                "failed to fetch cache statistics"
            ),
        }
    }

    if let Some(path) = &config.summary_export {
        let json = serde_json::to_vec_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        tracing::info!("summary written to {}", path.display());
    }

    Ok(report)
}
