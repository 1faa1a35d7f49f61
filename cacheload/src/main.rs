//! Drives a cache endpoint with a hot/cold key workload under a ramping number of concurrent
//! callers, then checks latency, throughput and errors against fixed targets.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::process::ExitCode;

use anyhow::Result;

fn main() -> Result<ExitCode> {
    cacheload::cli::execute()
}
