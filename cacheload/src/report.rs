//! Reduces run statistics to percentiles and rates and checks them against service-level targets.
//!
//! Percentiles use the nearest-rank method over the sorted samples: the `p`-th percentile of `n`
//! samples is the sample at rank `ceil(p / 100 * n)`, clamped to `1..=n`. When latencies were
//! collected with [`LatencyMode::Sketch`](crate::metrics::LatencyMode::Sketch), percentiles come
//! from the sketch instead and are accurate to within 1% of the true value.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use yansi::{Paint, Painted};

use crate::error::ConfigError;
use crate::http::CacheStats;
use crate::metrics::{LatencySamples, NO_STATUS, RunStatistics};

/// Service-level targets a run has to meet.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    /// Highest acceptable share of transport failures. `0` means no request may fail.
    pub max_error_rate: f64,
    /// The 99th percentile latency has to stay below this value.
    #[serde(with = "humantime_serde")]
    pub p99_latency: Duration,
    /// Lowest acceptable request throughput per second.
    pub min_qps: f64,
}

impl Thresholds {
    /// Checks that all targets are non-negative numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_error_rate", self.max_error_rate),
            ("min_qps", self.min_qps),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.0,
            p99_latency: Duration::from_millis(120),
            min_qps: 12_000.0,
        }
    }
}

/// Latency distribution of a run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Fastest request.
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    /// Arithmetic mean.
    #[serde(with = "humantime_serde")]
    pub avg: Duration,
    /// 50th percentile.
    #[serde(with = "humantime_serde")]
    pub median: Duration,
    /// 90th percentile.
    #[serde(with = "humantime_serde")]
    pub p90: Duration,
    /// 95th percentile.
    #[serde(with = "humantime_serde")]
    pub p95: Duration,
    /// 99th percentile.
    #[serde(with = "humantime_serde")]
    pub p99: Duration,
    /// Slowest request.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Whether percentiles are approximations.
    pub approximate: bool,
}

impl LatencySummary {
    /// Computes the summary, or `None` if there are no samples.
    pub fn compute(samples: &LatencySamples) -> Option<Self> {
        match samples {
            LatencySamples::Exact(samples) => Self::from_exact(samples),
            LatencySamples::Sketch(sketch) => {
                let quantile = |q: f64| sketch.quantile(q).ok().flatten();
                let count = sketch.count();
                if count == 0 {
                    return None;
                }

                Some(Self {
                    min: micros(sketch.min()?),
                    avg: micros(sketch.sum()? / count as f64),
                    median: micros(quantile(0.5)?),
                    p90: micros(quantile(0.9)?),
                    p95: micros(quantile(0.95)?),
                    p99: micros(quantile(0.99)?),
                    max: micros(sketch.max()?),
                    approximate: true,
                })
            }
        }
    }

    fn from_exact(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let sum: u128 = sorted.iter().map(|&sample| u128::from(sample)).sum();
        let avg_nanos = sum * 1000 / sorted.len() as u128;

        Some(Self {
            min: Duration::from_micros(sorted[0]),
            avg: Duration::from_nanos(avg_nanos.min(u64::MAX as u128) as u64),
            median: Duration::from_micros(nearest_rank(&sorted, 50.0)),
            p90: Duration::from_micros(nearest_rank(&sorted, 90.0)),
            p95: Duration::from_micros(nearest_rank(&sorted, 95.0)),
            p99: Duration::from_micros(nearest_rank(&sorted, 99.0)),
            max: Duration::from_micros(sorted[sorted.len() - 1]),
            approximate: false,
        })
    }
}

fn micros(value: f64) -> Duration {
    Duration::from_nanos((value.max(0.0) * 1000.0).round() as u64)
}

/// Returns the `percentile`-th value of non-empty, ascending `sorted` using the nearest rank.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    let rank = (percentile * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Outcome of every threshold check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Throughput reached `min_qps`.
    pub qps: bool,
    /// p99 latency was computed and stayed below `p99_latency`.
    pub p99: bool,
    /// The error rate did not exceed `max_error_rate`.
    pub error_rate: bool,
}

impl Verdict {
    /// Returns `true` if all thresholds passed.
    pub fn passed(&self) -> bool {
        self.qps && self.p99 && self.error_rate
    }
}

/// The final, read-only summary of a run.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// Number of issued requests.
    pub total_requests: u64,
    /// Requests that failed on the transport layer.
    pub failed_requests: u64,
    /// Wall-clock duration of the run.
    #[serde(with = "humantime_serde")]
    pub run_duration: Duration,
    /// Requests per second.
    pub qps: f64,
    /// Share of requests that failed on the transport layer.
    pub error_rate: f64,
    /// Share of requests whose response had status 200.
    pub check_pass_rate: f64,
    /// Share of requests that targeted a hot key.
    pub hot_key_rate: f64,
    /// Highest number of concurrently active callers.
    pub peak_callers: usize,
    /// Responses per HTTP status. Transport failures are counted under `0`.
    pub status_counts: Vec<(u16, u64)>,
    /// Latency distribution, `None` if no request completed.
    pub latency: Option<LatencySummary>,
    /// The targets this report was checked against.
    pub thresholds: Thresholds,
    /// Result of the threshold checks.
    pub verdict: Verdict,
    /// Statistics reported by the target's cache, if they were fetched.
    pub cache_stats: Option<CacheStats>,
}

impl Report {
    /// Computes the report for `stats` without modifying them.
    pub fn new(stats: &RunStatistics, thresholds: &Thresholds) -> Self {
        let total = stats.total_requests;
        let ratio = |count: u64| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            }
        };

        let seconds = stats.run_duration.as_secs_f64();
        let qps = if seconds > 0.0 {
            total as f64 / seconds
        } else {
            0.0
        };
        let error_rate = ratio(stats.failed_requests);
        let latency = LatencySummary::compute(&stats.latencies);

        let verdict = Verdict {
            qps: qps >= thresholds.min_qps,
            p99: latency.is_some_and(|latency| latency.p99 < thresholds.p99_latency),
            error_rate: error_rate <= thresholds.max_error_rate,
        };

        Self {
            total_requests: total,
            failed_requests: stats.failed_requests,
            run_duration: stats.run_duration,
            qps,
            error_rate,
            check_pass_rate: ratio(stats.check_pass_count),
            hot_key_rate: ratio(stats.hot_requests),
            peak_callers: stats.peak_callers,
            status_counts: stats.status_counts.iter().map(|(&s, &c)| (s, c)).collect(),
            latency,
            thresholds: *thresholds,
            verdict,
            cache_stats: None,
        }
    }

    /// Attaches statistics fetched from the target's cache.
    pub fn with_cache_stats(mut self, cache_stats: CacheStats) -> Self {
        self.cache_stats = Some(cache_stats);
        self
    }

    /// Returns `true` if every threshold passed.
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

/// Renders the human-readable report for `stats`.
pub fn render(stats: &RunStatistics, thresholds: &Thresholds) -> String {
    Report::new(stats, thresholds).to_string()
}

const RULE_WIDTH: usize = 80;

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Formats an integer with thousands separators.
fn grouped(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

fn mark(passed: bool) -> Painted<&'static str> {
    if passed {
        Painted::new("PASS").green().bold()
    } else {
        Painted::new("FAIL").red().bold()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "═".repeat(RULE_WIDTH);
        let target_p99 = millis(self.thresholds.p99_latency);

        writeln!(f)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "{}", "Load test summary".bold())?;
        writeln!(f, "{rule}")?;
        writeln!(f)?;

        match &self.latency {
            Some(latency) => {
                write!(f, "{}", "HTTP response time".bold())?;
                if latency.approximate {
                    write!(f, " (approximate, 1% relative accuracy)")?;
                }
                writeln!(f, ":")?;
                writeln!(f, "  avg: {:.2} ms", millis(latency.avg))?;
                writeln!(f, "  min: {:.2} ms", millis(latency.min))?;
                writeln!(f, "  max: {:.2} ms", millis(latency.max))?;
                writeln!(f, "  med: {:.2} ms", millis(latency.median))?;
                writeln!(f, "  p90: {:.2} ms", millis(latency.p90))?;
                writeln!(f, "  p95: {:.2} ms", millis(latency.p95))?;
                writeln!(
                    f,
                    "  p99: {:.2} ms [target: <{target_p99}ms]",
                    millis(latency.p99).bold()
                )?;
            }
            None => {
                writeln!(f, "{}:", "HTTP response time".bold())?;
                writeln!(f, "  {}", "not computed (no requests completed)".yellow())?;
            }
        }
        writeln!(f)?;

        writeln!(f, "{}:", "Requests".bold())?;
        writeln!(f, "  total: {}", grouped(self.total_requests))?;
        writeln!(
            f,
            "  QPS: {:.2} requests/s [target: >={}]",
            self.qps.bold(),
            self.thresholds.min_qps
        )?;
        writeln!(f, "  hot keys: {:.2}%", self.hot_key_rate * 100.0)?;
        writeln!(f, "  peak callers: {}", self.peak_callers)?;
        if !self.status_counts.is_empty() {
            let statuses: Vec<_> = self
                .status_counts
                .iter()
                .map(|&(status, count)| match status {
                    NO_STATUS => format!("no response: {}", grouped(count)),
                    status => format!("{status}: {}", grouped(count)),
                })
                .collect();
            writeln!(f, "  statuses: {}", statuses.join(", "))?;
        }
        writeln!(f)?;

        writeln!(f, "Error rate: {:.4}%", self.error_rate * 100.0)?;
        writeln!(f, "Check pass rate: {:.2}%", self.check_pass_rate * 100.0)?;
        writeln!(f)?;

        if let Some(cache) = &self.cache_stats {
            writeln!(f, "{}:", "Target cache".bold())?;
            writeln!(
                f,
                "  hit rate: {:.2}% ({} hits, {} misses, {} lookups)",
                cache.hit_rate * 100.0,
                grouped(cache.hit_count),
                grouped(cache.miss_count),
                grouped(cache.request_count)
            )?;
            writeln!(
                f,
                "  loads: {} ({} failed), evictions: {}, avg load penalty: {:.2} ms",
                grouped(cache.load_count),
                grouped(cache.load_failure_count),
                grouped(cache.eviction_count),
                cache.average_load_penalty / 1_000_000.0
            )?;
            writeln!(f)?;
        }

        writeln!(f, "{}:", "Thresholds".bold())?;
        writeln!(
            f,
            "  QPS: {} {:.2} (target: >={})",
            mark(self.verdict.qps),
            self.qps,
            self.thresholds.min_qps
        )?;
        match &self.latency {
            Some(latency) => writeln!(
                f,
                "  P99: {} {:.2}ms (target: <{target_p99}ms)",
                mark(self.verdict.p99),
                millis(latency.p99)
            )?,
            None => writeln!(
                f,
                "  P99: {} not computed (target: <{target_p99}ms)",
                mark(false)
            )?,
        }
        writeln!(
            f,
            "  Errors: {} {:.4}% (target: <={}%)",
            mark(self.verdict.error_rate),
            self.error_rate * 100.0,
            self.thresholds.max_error_rate * 100.0
        )?;
        writeln!(f)?;

        let result = if self.passed() {
            Painted::new("PASSED").green().bold()
        } else {
            Painted::new("FAILED").red().bold()
        };
        writeln!(f, "Result: {result}")?;
        writeln!(f, "{rule}")
    }
}
