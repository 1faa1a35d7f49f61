//! Realizes a [`ConcurrencySchedule`] by spawning and retiring caller tasks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::http::{RequestIssuer, Transport};
use crate::metrics::{LatencyMode, MetricsCollector, RunStatistics};
use crate::schedule::ConcurrencySchedule;
use crate::workload::{KeyRange, KeySampler};

/// Default interval at which the driver matches callers to the schedule.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Active callers compared to the schedule at one tick of the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcurrencyTick {
    /// Time since the start of the run.
    pub elapsed: Duration,
    /// Callers the schedule asked for.
    pub target: usize,
    /// Callers running after the driver adjusted to the target.
    pub active: usize,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunResult {
    /// Aggregated request statistics.
    pub statistics: RunStatistics,
    /// Concurrency at every tick of the driver.
    pub timeline: Vec<ConcurrencyTick>,
}

/// Orchestrates a load test run.
///
/// Every caller loops on *sample key → issue request → record outcome* without any delay between
/// requests. Retired callers and all callers at the end of the run finish their in-flight request
/// before they stop; requests are never cancelled midway.
pub struct LoadDriver<T> {
    issuer: Arc<RequestIssuer<T>>,
    keys: KeyRange,
    schedule: ConcurrencySchedule,
    tick: Duration,
    latency_mode: LatencyMode,
    seed: u64,
    progress: ProgressBar,
}

impl<T: fmt::Debug> fmt::Debug for LoadDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadDriver")
            .field("issuer", &self.issuer)
            .field("keys", &self.keys)
            .field("schedule", &self.schedule)
            .field("tick", &self.tick)
            .field("latency_mode", &self.latency_mode)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> LoadDriver<T> {
    /// Creates a driver with a random seed, exact latency samples and no progress output.
    pub fn new(issuer: RequestIssuer<T>, keys: KeyRange, schedule: ConcurrencySchedule) -> Self {
        Self {
            issuer: Arc::new(issuer),
            keys,
            schedule,
            tick: DEFAULT_TICK,
            latency_mode: LatencyMode::Exact,
            seed: rand::random(),
            progress: ProgressBar::hidden(),
        }
    }

    /// How often active callers are matched against the schedule.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// How latency samples are stored.
    pub fn latency_mode(mut self, mode: LatencyMode) -> Self {
        self.latency_mode = mode;
        self
    }

    /// Master seed from which every caller's key stream is derived.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Shows live progress on the given bar.
    pub fn progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    /// Runs the whole schedule and waits for all callers to drain.
    pub async fn run(self) -> RunResult {
        let metrics = Arc::new(MetricsCollector::new(
            self.latency_mode,
            self.keys.hot().clone(),
        ));
        let total = self.schedule.total_duration();
        let mut seeds = SmallRng::seed_from_u64(self.seed);

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        // stop tokens of running callers, oldest first
        let mut callers: Vec<CancellationToken> = Vec::new();
        let mut timeline = Vec::new();

        tracing::info!(
            stages = self.schedule.stages().len(),
            duration = ?total,
            "starting load test"
        );

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            while let Some(result) = tasks.try_join_next() {
                log_join_error(result);
            }

            let target = self.schedule.target_at(elapsed);
            if callers.len() < target {
                for _ in callers.len()..target {
                    let stop = shutdown.child_token();
                    let sampler = self.keys.sampler(seeds.next_u64());
                    tasks.spawn(caller(
                        Arc::clone(&self.issuer),
                        sampler,
                        Arc::clone(&metrics),
                        stop.clone(),
                    ));
                    callers.push(stop);
                }
            } else {
                for stop in callers.drain(target..) {
                    stop.cancel();
                }
            }

            let active = callers.len();
            metrics.observe_callers(active);
            timeline.push(ConcurrencyTick {
                elapsed,
                target,
                active,
            });

            let progress = metrics.progress();
            self.progress.set_message(format!(
                "{} callers, {} requests, {} failed",
                active.bold(),
                progress.total_requests,
                progress.failed_requests
            ));
        }

        tracing::info!(
            callers = callers.len(),
            "schedule complete, draining callers"
        );
        self.progress.set_message("Draining callers...");
        shutdown.cancel();
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
        let run_duration = start.elapsed();
        self.progress.finish_and_clear();

        let statistics = metrics.finish(run_duration);
        tracing::info!(
            requests = statistics.total_requests,
            failed = statistics.failed_requests,
            duration = ?run_duration,
            "load test finished"
        );

        RunResult {
            statistics,
            timeline,
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = &err as &dyn std::error::Error, "caller task failed");
    }
}

/// The loop of a single caller, running until `stop` is cancelled.
async fn caller<T: Transport>(
    issuer: Arc<RequestIssuer<T>>,
    mut sampler: KeySampler,
    metrics: Arc<MetricsCollector>,
    stop: CancellationToken,
) {
    while !stop.is_cancelled() {
        let key = sampler.next_key();
        let outcome = issuer.issue(key).await;
        metrics.record(outcome);
    }
}
