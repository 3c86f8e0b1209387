//! # talon-plugin
//!
//! Extension framework for Talon. Provides:
//!
//! - A type-keyed event bus with synchronous, ordered delivery
//! - The C-linkage extension ABI and the `export_extension!` macro
//! - The context bundle handed to extensions (events, hooks, config, logging)
//! - Dynamic loading via `libloading`, with a per-extension lifecycle

pub mod api;
pub mod events;
pub mod ffi;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod prelude;
pub mod registry;

pub use api::context::{ActionSink, ExtensionContext, HostContext};
pub use events::{Event, EventBus};
pub use loader::{ExtensionLibrary, LibraryOpener, NativeOpener};
pub use manager::{ExtensionLoader, ExtensionSnapshot, ExtensionState};
pub use registry::{Extension, ExtensionInfo};
