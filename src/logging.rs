//! Logging setup shared by the CLI and the server.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines (for terminals).
    #[default]
    Text,
    /// JSON structured logs (for log shippers).
    Json,
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "prepdesk=debug,info" } else { "info" }
}

/// Initializes the logging subsystem. Logs go to stderr so command output on
/// stdout stays clean.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_logging(format: LogFormat, verbose: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        let registry = tracing_subscriber::registry().with(env_filter);
        // A subscriber installed by a test harness wins.
        match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .ok(),
            LogFormat::Text => registry
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init()
                .ok(),
        };
    });
}
