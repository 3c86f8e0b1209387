//! Unified error types for Talon.
//!
//! Every crate in the workspace maps its failures into [`AppError`] so that
//! interception, loading, and configuration errors propagate through `?`
//! with a single type.

use std::fmt;
use thiserror::Error;

/// Error categories shared by every subsystem of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// A native call-site redirection could not be installed or removed.
    HookFailed,
    /// A hook or subscription id was not registered.
    HookNotFound,
    /// A subsystem was initialized twice.
    AlreadyInitialized,
    /// A subsystem was used or shut down before initialization.
    NotInitialized,
    /// An extension library could not be opened, resolved, or instantiated.
    LoadFailed,
    /// An extension failed during register or unregister.
    RegistrationFailed,
    /// A configuration error occurred.
    Configuration,
    /// A filesystem or OS-level I/O error occurred.
    Io,
    /// An unexpected internal error occurred.
    Internal,
}

impl ErrorKind {
    /// Returns whether errors of this kind are non-fatal idempotency guard hits.
    pub fn is_guard_hit(&self) -> bool {
        matches!(self, Self::AlreadyInitialized | Self::NotInitialized)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HookFailed => write!(f, "HOOK_FAILED"),
            Self::HookNotFound => write!(f, "HOOK_NOT_FOUND"),
            Self::AlreadyInitialized => write!(f, "ALREADY_INITIALIZED"),
            Self::NotInitialized => write!(f, "NOT_INITIALIZED"),
            Self::LoadFailed => write!(f, "LOAD_FAILED"),
            Self::RegistrationFailed => write!(f, "REGISTRATION_FAILED"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Io => write!(f, "IO"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// The unified error used throughout Talon.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a hook-failed error.
    pub fn hook_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HookFailed, message)
    }

    /// Create a hook-not-found error.
    pub fn hook_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HookNotFound, message)
    }

    /// Create an already-initialized error.
    pub fn already_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyInitialized, message)
    }

    /// Create a not-initialized error.
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, message)
    }

    /// Create a load-failed error.
    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadFailed, message)
    }

    /// Create a registration-failed error.
    pub fn registration_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RegistrationFailed, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Io, format!("I/O error: {err}"), err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("JSON value error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
