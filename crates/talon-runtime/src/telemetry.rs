//! Logging initialisation.

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use talon_core::config::LoggingConfig;

/// Installs the global `tracing` subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. Returns `false` when a
/// subscriber was already installed, for example by an embedding host.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init()
            .is_ok(),
        _ => fmt()
            .pretty()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok(),
    };

    if !installed {
        debug!("Global subscriber already installed; keeping it");
    }
    installed
}
