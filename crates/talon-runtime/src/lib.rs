//! # talon-runtime
//!
//! Host side of Talon. Owns the services extensions talk to and drives them
//! from the host's tick:
//!
//! - [`queue::ActionQueue`]: cross-thread hand-off onto the tick thread
//! - [`runtime::Runtime`]: bring-up, extension loading, tick loop and the
//!   ordered shutdown sequence
//! - [`telemetry::init_logging`]: `tracing` subscriber installation

pub mod queue;
pub mod runtime;
pub mod telemetry;

pub use queue::{ActionQueue, ActionSender};
pub use runtime::{Runtime, RuntimeBuilder, TickStats};
pub use telemetry::init_logging;
