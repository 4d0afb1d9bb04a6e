//! Tracing subscriber bootstrap.

use crate::config::TelemetryConfig;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from telemetry config.
///
/// Safe to call more than once per process; subsequent calls are no-ops
/// (the global subscriber can only be set once, any later attempt is ignored).
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if config.json_output {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = result {
        tracing::debug!("tracing subscriber already initialized: {err}");
    }
}
