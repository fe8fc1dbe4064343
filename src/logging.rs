//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Environment variable holding the log filter, e.g. `JARSWEEP_LOG=jarsweep::archive=debug`.
pub const LOG_ENV: &str = "JARSWEEP_LOG";

/// Installs the global subscriber. Logs go to stderr so SARIF output on
/// stdout stays clean. Falls back to `jarsweep=info` (`jarsweep=debug` when
/// `verbose`) if `JARSWEEP_LOG` is unset or invalid. Safe to call repeatedly.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose { "jarsweep=debug" } else { "jarsweep=info" };
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    });
}
