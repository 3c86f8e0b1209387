//! Event system: the bus and the events the host emits on it.

pub mod bus;
pub mod types;

pub use bus::{Event, EventBus};
pub use types::{ExtensionsRegistered, ShutdownEvent, TickEvent};
