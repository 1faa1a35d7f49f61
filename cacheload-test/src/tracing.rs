use tracing_subscriber::EnvFilter;

/// Directives applied when `RUST_LOG` is not set.
///
/// Logs of the load generator and the test target are captured in full, while the HTTP stack
/// only reports warnings.
const DEFAULT_DIRECTIVES: &str = "ERROR,hyper=WARN,reqwest=WARN,cacheload=TRACE,cacheload_test=TRACE";

/// Initialize the logger for testing.
///
/// Logs go to the writer of the Rust test runner, so they are only shown for failing tests.
/// `RUST_LOG` replaces the default directives.
///
/// # Example
///
/// ```
/// cacheload_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
