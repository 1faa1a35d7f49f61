//! Target concurrency as a function of elapsed test time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A phase of the load test that moves concurrency linearly towards `target`.
///
/// A stage whose target equals the previous stage's target holds concurrency steady.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Stage {
    /// How long the stage lasts.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Number of concurrent callers at the end of the stage.
    pub target: usize,
}

impl Stage {
    /// Creates a stage that reaches `target` callers after `duration`.
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// An ordered sequence of [`Stage`]s forming a piecewise-linear ramp that starts at zero callers.
#[derive(Clone, Debug)]
pub struct ConcurrencySchedule {
    stages: Vec<Stage>,
    total_duration: Duration,
}

impl ConcurrencySchedule {
    /// Creates a schedule from at least one stage.
    ///
    /// The total duration of all stages must fit into a [`Duration`].
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }

        let total_duration = stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| {
                total.checked_add(stage.duration)
            })
            .ok_or(ConfigError::ScheduleTooLong)?;

        Ok(Self {
            stages,
            total_duration,
        })
    }

    /// The stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Number of callers that should be active `elapsed` into the run.
    ///
    /// Each stage interpolates from the previous stage's target, rounded to the nearest caller.
    /// Past the end of the schedule the last target is returned.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut start = 0;
        let mut stage_begin = Duration::ZERO;

        for stage in &self.stages {
            // bounded by `total_duration`, which was checked on construction
            let stage_end = stage_begin.saturating_add(stage.duration);
            if elapsed < stage_end {
                // `elapsed < stage_end` rules out zero-length stages here
                let progress = (elapsed - stage_begin).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = stage.target as f64 - start as f64;
                return (start as f64 + delta * progress).round().max(0.0) as usize;
            }
            start = stage.target;
            stage_begin = stage_end;
        }

        start
    }
}

impl Default for ConcurrencySchedule {
    /// Ramps up to 2000 callers within 10 seconds and holds them for 50 seconds.
    fn default() -> Self {
        Self {
            stages: vec![
                Stage::new(Duration::from_secs(10), 2000),
                Stage::new(Duration::from_secs(50), 2000),
            ],
            total_duration: Duration::from_secs(60),
        }
    }
}
