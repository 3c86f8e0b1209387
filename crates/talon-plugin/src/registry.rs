//! The extension contract: metadata plus the register/unregister entry points.

use std::fmt;

use serde::{Deserialize, Serialize};

use talon_core::result::AppResult;

use crate::api::context::ExtensionContext;

/// Metadata reported by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// Extension name; also scopes its configuration keys and log records.
    pub name: String,
    /// Extension version string.
    pub version: String,
    /// Author or maintainer.
    pub author: String,
    /// Short description.
    pub description: String,
}

impl ExtensionInfo {
    /// Creates metadata with an empty author and description.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: String::new(),
            description: String::new(),
        }
    }

    /// Sets the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Display for ExtensionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Trait every extension implements.
///
/// An extension is created by its library's factory export, registered once
/// with a context bundle, unregistered once before unload, and then destroyed
/// by its library's destructor export.
pub trait Extension {
    /// Returns the extension's metadata.
    fn info(&self) -> ExtensionInfo;

    /// Wires the extension into the host: subscribe to events, add hooks,
    /// read configuration.
    ///
    /// Everything registered through `ctx` is released automatically when the
    /// extension is unloaded.
    fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()>;

    /// Called once before unload, if registration succeeded.
    fn on_unregister(&mut self) -> AppResult<()> {
        Ok(())
    }
}
