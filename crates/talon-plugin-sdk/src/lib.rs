//! # talon-plugin-sdk
//!
//! SDK for developing Talon extensions.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use talon_plugin_sdk::prelude::*;
//!
//! struct Announcer;
//!
//! impl Extension for Announcer {
//!     fn info(&self) -> ExtensionInfo {
//!         extension_info!(
//!             name: "announcer",
//!             version: "0.1.0",
//!             author: "Developer",
//!             description: "Logs every hundredth tick"
//!         )
//!     }
//!
//!     fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()> {
//!         let log = ctx.log().clone();
//!         ctx.subscribe(move |tick: &mut TickEvent| {
//!             if tick.frame_number % 100 == 0 {
//!                 log.info("another hundred ticks");
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//!
//! export_extension!(Announcer);
//! ```
//!
//! Build the crate as a `cdylib` and drop the library into the host's
//! extension directory.
//!
//! Log through [`ExtensionContext::log`](talon_plugin::ExtensionContext::log).
//! The library links its own copy of `tracing`, which has no subscriber
//! installed; macros from it emit nothing.

/// Prelude for convenient imports.
pub mod prelude {
    pub use talon_plugin::prelude::*;

    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}

pub use talon_plugin;
pub use talon_plugin::{export_extension, extension_info};
