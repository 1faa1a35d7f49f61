//! Collects request outcomes from all callers into run-wide statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;

/// Sentinel status recorded when no response was received.
pub const NO_STATUS: u16 = 0;

/// The result of a single request issued by a caller.
#[derive(Clone, Debug)]
pub struct RequestOutcome {
    /// When the request was sent.
    pub timestamp: SystemTime,
    /// The requested key.
    pub key: u64,
    /// HTTP status of the response, or [`NO_STATUS`] if the transport failed.
    pub status: u16,
    /// Time from sending the request until the full response arrived or the failure was detected.
    pub latency: Duration,
    /// Whether the transport completed without a network or timeout error.
    pub succeeded: bool,
    /// Whether the response passed the status check.
    pub check_passed: bool,
}

/// How latency samples are stored for the duration of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    /// Keep every sample. Percentiles are exact.
    #[default]
    Exact,
    /// Stream samples into a DDSketch with 1% relative accuracy. Memory stays bounded but
    /// percentiles are approximate.
    Sketch,
}

/// Latency samples of a run, in microseconds.
#[derive(Clone)]
pub enum LatencySamples {
    /// Every sample in arrival order.
    Exact(Vec<u64>),
    /// A quantile sketch over all samples.
    Sketch(DDSketch),
}

impl LatencySamples {
    fn new(mode: LatencyMode) -> Self {
        match mode {
            LatencyMode::Exact => Self::Exact(Vec::new()),
            LatencyMode::Sketch => Self::Sketch(DDSketch::default()),
        }
    }

    fn add(&mut self, latency: Duration) {
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        match self {
            Self::Exact(samples) => samples.push(micros),
            Self::Sketch(sketch) => sketch.add(micros as f64),
        }
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        match self {
            Self::Exact(samples) => samples.len(),
            Self::Sketch(sketch) => sketch.count(),
        }
    }

    /// Returns `true` if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The storage mode of these samples.
    pub fn mode(&self) -> LatencyMode {
        match self {
            Self::Exact(_) => LatencyMode::Exact,
            Self::Sketch(_) => LatencyMode::Sketch,
        }
    }

    /// Returns `true` if percentiles derived from these samples are approximations.
    pub fn is_approximate(&self) -> bool {
        matches!(self, Self::Sketch(_))
    }
}

impl fmt::Debug for LatencySamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencySamples")
            .field("mode", &self.mode())
            .field("len", &self.len())
            .finish()
    }
}

/// Aggregated results of a run, frozen once all callers have stopped.
#[derive(Clone, Debug)]
pub struct RunStatistics {
    /// Number of issued requests.
    pub total_requests: u64,
    /// Requests that failed on the transport layer.
    pub failed_requests: u64,
    /// Requests whose response passed the status check.
    pub check_pass_count: u64,
    /// Requests for a key from the hot interval.
    pub hot_requests: u64,
    /// Number of responses per HTTP status, with transport failures under [`NO_STATUS`].
    pub status_counts: BTreeMap<u16, u64>,
    /// Latency of every request, including failed ones.
    pub latencies: LatencySamples,
    /// Wall-clock duration of the run including the final drain.
    pub run_duration: Duration,
    /// Highest number of concurrently active callers.
    pub peak_callers: usize,
}

impl RunStatistics {
    /// Creates empty statistics for a run that recorded nothing.
    pub fn empty(mode: LatencyMode, run_duration: Duration) -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            check_pass_count: 0,
            hot_requests: 0,
            status_counts: BTreeMap::new(),
            latencies: LatencySamples::new(mode),
            run_duration,
            peak_callers: 0,
        }
    }
}

/// Live counters of a running test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Requests recorded so far.
    pub total_requests: u64,
    /// Transport failures recorded so far.
    pub failed_requests: u64,
}

/// Thread-safe accumulator of [`RequestOutcome`]s.
///
/// All counters and the latency samples live behind one lock, so every [`record`](Self::record)
/// is applied as a whole.
#[derive(Debug)]
pub struct MetricsCollector {
    hot_keys: RangeInclusive<u64>,
    inner: Mutex<RunStatistics>,
}

impl MetricsCollector {
    /// Creates an empty collector. Requests for keys in `hot_keys` are counted as hot.
    pub fn new(mode: LatencyMode, hot_keys: RangeInclusive<u64>) -> Self {
        Self {
            hot_keys,
            inner: Mutex::new(RunStatistics::empty(mode, Duration::ZERO)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunStatistics> {
        // a panicking caller cannot leave the statistics half-updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds a single outcome into the statistics.
    pub fn record(&self, outcome: RequestOutcome) {
        let is_hot = self.hot_keys.contains(&outcome.key);

        let mut stats = self.lock();
        stats.total_requests += 1;
        if !outcome.succeeded {
            stats.failed_requests += 1;
        }
        if outcome.check_passed {
            stats.check_pass_count += 1;
        }
        if is_hot {
            stats.hot_requests += 1;
        }
        *stats.status_counts.entry(outcome.status).or_default() += 1;
        stats.latencies.add(outcome.latency);
    }

    /// Records the number of currently active callers, keeping the highest value seen.
    pub fn observe_callers(&self, active: usize) {
        let mut stats = self.lock();
        stats.peak_callers = stats.peak_callers.max(active);
    }

    /// Returns the counters recorded so far.
    pub fn progress(&self) -> Progress {
        let stats = self.lock();
        Progress {
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
        }
    }

    /// Takes the statistics of a run that took `run_duration`, leaving the collector empty.
    ///
    /// Call this once all callers have stopped recording.
    pub fn finish(&self, run_duration: Duration) -> RunStatistics {
        let mut guard = self.lock();
        let mode = guard.latencies.mode();
        let mut stats = std::mem::replace(&mut *guard, RunStatistics::empty(mode, Duration::ZERO));
        stats.run_duration = run_duration;
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn outcome(key: u64, status: u16, latency_ms: u64) -> RequestOutcome {
        RequestOutcome {
            timestamp: SystemTime::now(),
            key,
            status,
            latency: Duration::from_millis(latency_ms),
            succeeded: status != NO_STATUS,
            check_passed: status == 200,
        }
    }

    #[test]
    fn debug_summarizes_samples() {
        let collector = MetricsCollector::new(LatencyMode::Sketch, 1..=50);
        collector.record(outcome(1, 200, 10));
        collector.record(outcome(2, 200, 20));

        let stats = collector.finish(Duration::from_secs(1));
        let debug = format!("{:?}", stats.latencies);
        assert_eq!(debug, "LatencySamples { mode: Sketch, len: 2 }");
        assert!(format!("{stats:?}").contains("total_requests: 2"));
    }

    #[test]
    fn record_counts() {
        let collector = MetricsCollector::new(LatencyMode::Exact, 1..=50);
        collector.record(outcome(1, 200, 10));
        collector.record(outcome(60, 500, 20));
        collector.record(outcome(2, NO_STATUS, 30));
        collector.observe_callers(3);
        collector.observe_callers(1);

        let stats = collector.finish(Duration::from_secs(1));
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.check_pass_count, 1);
        assert_eq!(stats.hot_requests, 2);
        assert_eq!(stats.peak_callers, 3);
        assert_eq!(
            stats.status_counts,
            BTreeMap::from([(NO_STATUS, 1), (200, 1), (500, 1)])
        );
        assert_eq!(stats.run_duration, Duration::from_secs(1));
        assert_eq!(collector.progress(), Progress::default());

        let LatencySamples::Exact(samples) = &stats.latencies else {
            panic!("expected exact samples");
        };
        assert_eq!(samples, &[10_000, 20_000, 30_000]);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        const THREADS: u64 = 16;
        const PER_THREAD: u64 = 5_000;

        for mode in [LatencyMode::Exact, LatencyMode::Sketch] {
            let collector = Arc::new(MetricsCollector::new(mode, 1..=50));

            std::thread::scope(|scope| {
                for thread in 0..THREADS {
                    let collector = Arc::clone(&collector);
                    scope.spawn(move || {
                        for i in 0..PER_THREAD {
                            let status = if i % 10 == 0 { NO_STATUS } else { 200 };
                            collector.record(outcome(thread + 1, status, i % 100));
                        }
                    });
                }
            });

            let stats = collector.finish(Duration::from_secs(1));
            assert_eq!(stats.total_requests, THREADS * PER_THREAD);
            assert_eq!(stats.failed_requests, THREADS * PER_THREAD / 10);
            assert_eq!(stats.check_pass_count, THREADS * PER_THREAD * 9 / 10);
            assert_eq!(stats.hot_requests, THREADS * PER_THREAD);
            assert_eq!(stats.latencies.len() as u64, THREADS * PER_THREAD);
        }
    }

    #[test]
    fn progress_reflects_records() {
        let collector = MetricsCollector::new(LatencyMode::Sketch, 1..=50);
        assert_eq!(collector.progress(), Progress::default());

        collector.record(outcome(1, 200, 1));
        collector.record(outcome(1, NO_STATUS, 1));
        assert_eq!(
            collector.progress(),
            Progress {
                total_requests: 2,
                failed_requests: 1
            }
        );
    }
}
