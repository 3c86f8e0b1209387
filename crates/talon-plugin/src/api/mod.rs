//! Extension API: the context bundle and the services it exposes.

pub mod config;
pub mod context;
pub mod log;

pub use config::{ConfigSection, ConfigStore, MemoryConfigStore};
pub use context::{ActionSink, ExtensionContext, HostContext};
pub use log::{ExtensionLogger, LogLevel, LogSink};
