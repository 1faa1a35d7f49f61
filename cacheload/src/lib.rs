//! A load generator which drives a cache endpoint with a skewed key workload.
//!
//! Every request asks for a key from [`KeyRange`]: most requests target a small interval of *hot*
//! keys, the rest spread across a larger interval of *cold* keys. This models cache-friendly
//! traffic with a tail of misses.
//!
//! The number of concurrent callers follows a [`ConcurrencySchedule`] of linear ramps. The
//! [`LoadDriver`] starts and retires callers to follow it, while each caller issues requests back
//! to back and records their outcomes in a shared [`MetricsCollector`].
//!
//! After the run, the [`Report`] reduces the statistics to latency percentiles, throughput and
//! error rate, and checks them against [`Thresholds`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod loadtest;
pub mod metrics;
pub mod observability;
pub mod report;
pub mod schedule;
pub mod workload;

pub use crate::driver::LoadDriver;
pub use crate::loadtest::run;
pub use crate::metrics::MetricsCollector;
pub use crate::report::{Report, Thresholds};
pub use crate::schedule::ConcurrencySchedule;
pub use crate::workload::KeyRange;
