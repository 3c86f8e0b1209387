//! Extension discovery configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Extension loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Directory scanned (non-recursively) for extension libraries.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Whether to discover and load extensions during bootstrap.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// File extension identifying candidate libraries, without the dot.
    #[serde(default = "default_library_extension")]
    pub library_extension: String,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            auto_load: true,
            library_extension: default_library_extension(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("./extensions")
}

fn default_true() -> bool {
    true
}

fn default_library_extension() -> String {
    std::env::consts::DLL_EXTENSION.to_string()
}
