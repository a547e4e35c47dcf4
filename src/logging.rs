//! Tracing subscriber setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive (e.g. `rtbatch=debug`).
pub const LOG_ENV: &str = "RTBATCH_LOG";

/// Install a fmt subscriber filtered by `RTBATCH_LOG` (default `info`).
///
/// Returns false if a global subscriber was already set.
pub fn init() -> bool {
    init_with_default("info")
}

/// Like [`init`] with a caller-chosen default directive.
pub fn init_with_default(default: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
