//! Core type definitions used across the Talon workspace.

pub mod action;
pub mod id;

pub use action::QueuedAction;
pub use id::*;
