//! Command line entry point of the `cacheload` binary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{loadtest, observability};

/// Exit code when the run completed but missed at least one threshold.
const THRESHOLDS_FAILED: u8 = 99;

/// Load generator for hot-key cache endpoints.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Config(ConfigCommand),
}

/// run the load test and print the report (default)
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// print the effective configuration as JSON
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "config")]
struct ConfigCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref())?;

    if let Some(Command::Config(_)) = args.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    observability::init_colors();
    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(loadtest::run(&config))?;
    println!("{report}");

    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(THRESHOLDS_FAILED))
    }
}
