//! Logging setup

use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=info,sled=warn";

/// Build the env filter. `--debug` wins over RUST_LOG.
pub fn build_env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug,sled=info");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global subscriber
pub fn init_logging(format: LogFormat, debug: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(debug))
        .with_target(true);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
}
