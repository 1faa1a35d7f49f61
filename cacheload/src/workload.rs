//! Defines the skewed key distribution that load test callers request.

use std::ops::RangeInclusive;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};

use crate::error::ConfigError;

/// Two disjoint key intervals and the probability of picking from the hot one.
///
/// The default models a cache with a small set of hot keys: `1..=50` is requested 96% of the
/// time, the remaining requests spread across `51..=1000`.
#[derive(Clone, Debug)]
pub struct KeyRange {
    hot: RangeInclusive<u64>,
    cold: RangeInclusive<u64>,
    p_hot: f64,

    hot_distribution: Uniform<u64>,
    cold_distribution: Uniform<u64>,
}

impl KeyRange {
    /// Creates a key range after validating that both intervals are non-empty and disjoint and
    /// that `p_hot` is a probability.
    pub fn new(
        hot: RangeInclusive<u64>,
        cold: RangeInclusive<u64>,
        p_hot: f64,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&p_hot) {
            return Err(ConfigError::InvalidHotProbability(p_hot));
        }
        let hot_distribution = uniform(&hot)?;
        let cold_distribution = uniform(&cold)?;

        if hot.start() <= cold.end() && cold.start() <= hot.end() {
            return Err(ConfigError::OverlappingKeyIntervals {
                hot_start: *hot.start(),
                hot_end: *hot.end(),
                cold_start: *cold.start(),
                cold_end: *cold.end(),
            });
        }

        Ok(Self {
            hot,
            cold,
            p_hot,
            hot_distribution,
            cold_distribution,
        })
    }

    /// The frequently requested keys.
    pub fn hot(&self) -> &RangeInclusive<u64> {
        &self.hot
    }

    /// The rarely requested keys.
    pub fn cold(&self) -> &RangeInclusive<u64> {
        &self.cold
    }

    /// Probability that a sampled key is hot.
    pub fn hot_probability(&self) -> f64 {
        self.p_hot
    }

    /// Returns `true` if the key belongs to the hot interval.
    pub fn is_hot(&self, key: u64) -> bool {
        self.hot.contains(&key)
    }

    /// Creates an independent sampler whose random stream is derived from `seed`.
    ///
    /// Every caller owns its own sampler, so no random state is shared between them.
    pub fn sampler(&self, seed: u64) -> KeySampler {
        KeySampler {
            rng: SmallRng::seed_from_u64(seed),
            p_hot: self.p_hot,
            hot: self.hot_distribution,
            cold: self.cold_distribution,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::new(1..=50, 51..=1000, 0.96).expect("default key range is valid")
    }
}

fn uniform(range: &RangeInclusive<u64>) -> Result<Uniform<u64>, ConfigError> {
    let empty = || ConfigError::EmptyKeyInterval {
        start: *range.start(),
        end: *range.end(),
    };

    if range.is_empty() {
        return Err(empty());
    }
    Uniform::new_inclusive(*range.start(), *range.end()).map_err(|_| empty())
}

/// Produces the key for the next request of a single caller.
#[derive(Debug)]
pub struct KeySampler {
    rng: SmallRng,
    p_hot: f64,
    hot: Uniform<u64>,
    cold: Uniform<u64>,
}

impl KeySampler {
    /// Draws the next key.
    ///
    /// A uniform fraction in `[0, 1)` below the hot probability selects the hot interval, which
    /// means a probability of `0` never yields a hot key and `1` never yields a cold key.
    pub fn next_key(&mut self) -> u64 {
        let r: f64 = self.rng.random();
        if r < self.p_hot {
            self.hot.sample(&mut self.rng)
        } else {
            self.cold.sample(&mut self.rng)
        }
    }
}
