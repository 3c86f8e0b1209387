//! Runtime configuration schemas.
//!
//! The root [`RuntimeConfig`] is deserialized via the `config` crate from an
//! optional TOML file layered with `TALON__<SECTION>__<KEY>` environment
//! variables. Every field has a default, so an absent file is valid.

pub mod extensions;
pub mod interception;
pub mod logging;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use self::extensions::ExtensionsConfig;
pub use self::interception::InterceptionConfig;
pub use self::logging::LoggingConfig;

use crate::error::AppError;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "TALON_CONFIG";

/// Default configuration file name, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "talon.toml";

/// Root runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Extension discovery settings.
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    /// Dispatch-hook bring-up settings.
    #[serde(default)]
    pub interception: InterceptionConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// A missing file is not an error; only malformed content is.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(false)),
            None => builder.add_source(
                config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
            ),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("TALON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Load configuration from the path in `TALON_CONFIG`, falling back to `talon.toml`.
    pub fn from_env() -> Result<Self, AppError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Some(Path::new(&path))),
            Err(_) => Self::load(None),
        }
    }
}
