//! Convenience result type alias for Talon.

use crate::error::AppError;

/// A specialized `Result` type for Talon operations.
pub type AppResult<T> = Result<T, AppError>;
