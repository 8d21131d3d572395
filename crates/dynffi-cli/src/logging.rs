//! Log subscriber setup

use dynffi_config::FfiConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when nothing else is configured
const DEFAULT_FILTER: &str = "warn";

/// Install the global `fmt` subscriber, writing to stderr
///
/// The filter comes from `--log`, then the loaded configuration (which
/// already folds in `DYNFFI_LOG`), then [`DEFAULT_FILTER`].
pub fn init(cli_filter: Option<&str>, config: &FfiConfig) {
    let directive = select_filter(cli_filter, config);
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

fn select_filter<'a>(cli_filter: Option<&'a str>, config: &'a FfiConfig) -> &'a str {
    cli_filter
        .or_else(|| config.log_filter())
        .unwrap_or(DEFAULT_FILTER)
}
