//! Logging handle for extensions.
//!
//! An extension library links its own copy of `tracing`, whose dispatcher
//! never sees the host's subscriber. Records therefore travel through a
//! [`LogSink`] built by the host and are emitted on the host side.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

/// Severity of an extension log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives log records on behalf of one extension.
pub trait LogSink: Send + Sync {
    /// Emits `message` at `level`.
    fn log(&self, level: LogLevel, message: &str);
}

/// [`LogSink`] that emits `tracing` events tagged with the extension name.
#[derive(Debug)]
pub(crate) struct TracingSink {
    extension: Arc<str>,
}

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(extension = %self.extension, "{message}"),
            LogLevel::Debug => debug!(extension = %self.extension, "{message}"),
            LogLevel::Info => info!(extension = %self.extension, "{message}"),
            LogLevel::Warn => warn!(extension = %self.extension, "{message}"),
            LogLevel::Error => error!(extension = %self.extension, "{message}"),
        }
    }
}

/// Logger tagged with an extension's name.
///
/// Cheap to clone and `Send`, so it can be captured by queued actions and
/// worker threads.
#[derive(Clone)]
pub struct ExtensionLogger {
    extension: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl ExtensionLogger {
    /// Creates a logger for `extension` that emits through the host's `tracing`
    /// subscriber.
    pub fn new(extension: &str) -> Self {
        let extension: Arc<str> = Arc::from(extension);
        Self {
            sink: Arc::new(TracingSink {
                extension: extension.clone(),
            }),
            extension,
        }
    }

    /// Creates a logger for `extension` that hands records to `sink`.
    pub fn with_sink(extension: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            extension: Arc::from(extension),
            sink,
        }
    }

    /// Name attached to every record.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.sink.log(level, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for ExtensionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionLogger")
            .field("extension", &self.extension)
            .finish()
    }
}
