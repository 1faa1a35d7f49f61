//! Error types for configuring and running a load test.

use std::time::Duration;

use thiserror::Error;

/// Invalid run configuration.
///
/// These errors are fatal and reported before any request is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL of the target could not be parsed.
    #[error("invalid base URL `{url}`: {reason}")]
    InvalidBaseUrl {
        /// The URL as configured.
        url: String,
        /// Why the URL was rejected.
        reason: String,
    },

    /// A key interval does not contain any key.
    #[error("key interval {start}..={end} is empty")]
    EmptyKeyInterval {
        /// First key of the interval.
        start: u64,
        /// Last key of the interval.
        end: u64,
    },

    /// The hot and cold key intervals share keys.
    #[error("hot keys {hot_start}..={hot_end} overlap cold keys {cold_start}..={cold_end}")]
    OverlappingKeyIntervals {
        /// First hot key.
        hot_start: u64,
        /// Last hot key.
        hot_end: u64,
        /// First cold key.
        cold_start: u64,
        /// Last cold key.
        cold_end: u64,
    },

    /// The probability of picking a hot key is not within `[0, 1]`.
    #[error("hot key probability {0} is not within [0, 1]")]
    InvalidHotProbability(f64),

    /// The concurrency schedule has no stages.
    #[error("concurrency schedule needs at least one stage")]
    EmptySchedule,

    /// The stage durations add up to more than a [`Duration`] can hold.
    #[error("concurrency schedule is too long")]
    ScheduleTooLong,

    /// The driver cannot poll the schedule with this interval.
    #[error("tick interval {0:?} must be greater than zero")]
    InvalidTickInterval(Duration),

    /// A threshold is negative or not a number.
    #[error("threshold `{name}` has invalid value {value}")]
    InvalidThreshold {
        /// Name of the threshold.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client")]
    Client(#[from] reqwest::Error),
}

/// A request that did not produce a response.
///
/// Transport errors never abort a run. They are folded into a failed
/// [`RequestOutcome`](crate::metrics::RequestOutcome).
#[derive(Debug, Error)]
pub enum TransportError {
    /// No complete response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection to the target could not be established.
    #[error("connection failed")]
    Connect(#[source] reqwest::Error),

    /// The request failed while sending or while receiving the body.
    #[error("request failed")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Request(err)
        }
    }
}
