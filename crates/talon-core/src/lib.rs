//! # talon-core
//!
//! Core crate for the Talon hooking runtime. Contains the unified error
//! system, process-unique identifiers, and configuration schemas.
//!
//! This crate has **no** internal dependencies on other Talon crates.

pub mod config;
pub mod error;
pub mod guard;
pub mod result;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
