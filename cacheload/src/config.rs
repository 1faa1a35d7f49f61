//! Configuration for a load test run.
//!
//! Configuration is merged from the following sources, highest precedence first:
//!
//! 1. Environment variables prefixed with `CACHELOAD__`, using `__` to separate nested fields
//! 2. The bare `BASE_URL` environment variable
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! - `CACHELOAD__BASE_URL=http://app:8081` sets the target
//! - `CACHELOAD__KEYS__HOT_PROBABILITY=0.9` changes the share of hot keys
//! - `CACHELOAD__THRESHOLDS__P99_LATENCY=200ms` relaxes the latency target
//!
//! # YAML Configuration File
//!
//! ```yaml
//! base_url: http://localhost:8081
//! stages:
//!   - duration: 10s
//!     target: 2000
//!   - duration: 50s
//!     target: 2000
//! keys:
//!   hot: { start: 1, end: 50 }
//!   cold: { start: 51, end: 1000 }
//!   hot_probability: 0.96
//! thresholds:
//!   max_error_rate: 0
//!   p99_latency: 120ms
//!   min_qps: 12000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::driver::DEFAULT_TICK;
use crate::error::ConfigError;
use crate::metrics::LatencyMode;
use crate::report::Thresholds;
use crate::schedule::{ConcurrencySchedule, Stage};
use crate::workload::KeyRange;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "CACHELOAD__";

/// Unprefixed environment variable that overrides the target URL.
const BASE_URL_ENV: &str = "BASE_URL";

/// An inclusive interval of keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyInterval {
    /// First key.
    pub start: u64,
    /// Last key.
    pub end: u64,
}

/// The key distribution requested by callers.
///
/// Used in: [`Config::keys`]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Keys {
    /// Frequently requested keys.
    ///
    /// # Default
    ///
    /// `1..=50`
    pub hot: KeyInterval,

    /// Rarely requested keys. Must not overlap with `hot`.
    ///
    /// # Default
    ///
    /// `51..=1000`
    pub cold: KeyInterval,

    /// Probability that a request targets a hot key.
    ///
    /// # Default
    ///
    /// `0.96`
    pub hot_probability: f64,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            hot: KeyInterval { start: 1, end: 50 },
            cold: KeyInterval {
                start: 51,
                end: 1000,
            },
            hot_probability: 0.96,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Chooses [`LogFormat::Pretty`] for a terminal, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Multi-line output with colors.
    Pretty,

    /// Compact single-line plain text output.
    Simplified,
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they do not interleave with the report on stdout.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration of a load test run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// URL of the service under test. Requests go to `{base_url}/api/hot?id={key}`.
    ///
    /// # Default
    ///
    /// `http://localhost:8081`
    ///
    /// # Environment Variables
    ///
    /// `CACHELOAD__BASE_URL` or `BASE_URL`
    pub base_url: String,

    /// Concurrency ramp, starting from zero callers.
    ///
    /// # Default
    ///
    /// Ramp to 2000 callers within `10s`, then hold for `50s`.
    pub stages: Vec<Stage>,

    /// Distribution of requested keys.
    pub keys: Keys,

    /// Targets the run must meet.
    pub thresholds: Thresholds,

    /// How often the driver matches active callers to the schedule.
    ///
    /// # Default
    ///
    /// `100ms`
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Time after which a single request counts as failed.
    ///
    /// # Default
    ///
    /// `60s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How latency samples are kept.
    ///
    /// `exact` keeps every sample; `sketch` bounds memory at the cost of approximate percentiles.
    ///
    /// # Default
    ///
    /// `exact`
    pub latency: LatencyMode,

    /// Master seed for the key streams of all callers. A random seed is used if unset.
    pub seed: Option<u64>,

    /// Whether to fetch `/api/cache/stats` from the target after the run.
    ///
    /// # Default
    ///
    /// `true`
    pub cache_stats: bool,

    /// Path to write the report to as JSON.
    pub summary_export: Option<PathBuf>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_owned(),
            stages: ConcurrencySchedule::default().stages().to_vec(),
            keys: Keys::default(),
            thresholds: Thresholds::default(),
            tick_interval: DEFAULT_TICK,
            request_timeout: Duration::from_secs(60),
            latency: LatencyMode::default(),
            seed: None,
            cache_stats: true,
            summary_export: None,
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. The `BASE_URL` environment variable
    /// 4. Environment variables (prefixed with `CACHELOAD__`)
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain invalid values. Semantic checks happen in [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::raw().only(&[BASE_URL_ENV]))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Checks every setting so that no request is issued with an invalid configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        self.key_range()?;
        self.schedule()?;
        self.thresholds.validate()?;
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidTickInterval(self.tick_interval));
        }
        Ok(())
    }

    /// The parsed target URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let url = Url::parse(&self.base_url).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        if url.host().is_none() {
            return Err(invalid("missing host".to_owned()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not contain a query or fragment".to_owned()));
        }

        Ok(url)
    }

    /// The validated key distribution.
    pub fn key_range(&self) -> Result<KeyRange, ConfigError> {
        let Keys {
            hot,
            cold,
            hot_probability,
        } = self.keys;
        KeyRange::new(hot.start..=hot.end, cold.start..=cold.end, hot_probability)
    }

    /// The validated concurrency schedule.
    pub fn schedule(&self) -> Result<ConcurrencySchedule, ConfigError> {
        ConcurrencySchedule::new(self.stages.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_scenario() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            config.validate().unwrap();

            assert_eq!(config.base_url().unwrap().as_str(), "http://localhost:8081/");
            assert_eq!(config.schedule().unwrap().total_duration(), Duration::from_secs(60));
            assert_eq!(config.keys, Keys::default());
            assert_eq!(config.thresholds, Thresholds::default());
            assert_eq!(config.latency, LatencyMode::Exact);
            assert!(config.cache_stats);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BASE_URL", "http://app:8081");
            jail.set_env("CACHELOAD__KEYS__HOT_PROBABILITY", "0.5");
            jail.set_env("CACHELOAD__THRESHOLDS__P99_LATENCY", "200ms");
            jail.set_env("CACHELOAD__LATENCY", "sketch");
            jail.set_env("CACHELOAD__SEED", "42");
            jail.set_env("CACHELOAD__LOGGING__LEVEL", "debug");

            let config = Config::load(None).unwrap();
            assert_eq!(config.base_url, "http://app:8081");
            assert_eq!(config.keys.hot_probability, 0.5);
            assert_eq!(config.thresholds.p99_latency, Duration::from_millis(200));
            assert_eq!(config.thresholds.min_qps, 12_000.0);
            assert_eq!(config.latency, LatencyMode::Sketch);
            assert_eq!(config.seed, Some(42));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);

            Ok(())
        });
    }

    #[test]
    fn prefixed_env_wins_over_base_url() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BASE_URL", "http://app:8081");
            jail.set_env("CACHELOAD__BASE_URL", "http://other:9000");

            let config = Config::load(None).unwrap();
            assert_eq!(config.base_url, "http://other:9000");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            base_url: http://cache.internal:8081
            stages:
              - duration: 5s
                target: 100
              - duration: 1m
                target: 100
              - duration: 5s
                target: 0
            keys:
              hot: { start: 1, end: 10 }
              cold: { start: 11, end: 20 }
            thresholds:
              min_qps: 500
            summary_export: summary.json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            config.validate().unwrap();

            let schedule = config.schedule().unwrap();
            assert_eq!(schedule.stages().len(), 3);
            assert_eq!(schedule.total_duration(), Duration::from_secs(70));
            assert_eq!(config.keys.hot, KeyInterval { start: 1, end: 10 });
            // unspecified nested fields keep their defaults
            assert_eq!(config.keys.hot_probability, 0.96);
            assert_eq!(config.thresholds.min_qps, 500.0);
            assert_eq!(
                config.thresholds.p99_latency,
                Duration::from_millis(120)
            );
            assert_eq!(config.summary_export, Some(PathBuf::from("summary.json")));

            Ok(())
        });
    }

    #[test]
    fn rejects_invalid_settings() {
        let config = Config {
            base_url: "localhost:8081".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let config = Config {
            base_url: "ftp://localhost".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let config = Config {
            stages: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptySchedule)));

        let config = Config {
            stages: vec![
                Stage::new(Duration::MAX, 1),
                Stage::new(Duration::from_secs(1), 1),
            ],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScheduleTooLong)
        ));

        let config = Config {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTickInterval(_))
        ));

        let config = Config {
            keys: Keys {
                hot_probability: 1.2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHotProbability(_))
        ));
    }
}
