//! Events emitted by the host runtime itself.

use serde::{Deserialize, Serialize};

use super::bus::Event;

/// Emitted once per host tick, after queued actions have been drained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    /// Tick counter, starting at 1.
    pub frame_number: u64,
    /// Seconds since the previous tick.
    pub delta_seconds: f32,
}

impl Event for TickEvent {
    const KEY: &'static str = "talon.tick";
}

/// Emitted when the host runtime begins shutting down, before extensions unload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownEvent;

impl Event for ShutdownEvent {
    const KEY: &'static str = "talon.shutdown";
}

/// Emitted after every loaded extension has been offered registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionsRegistered {
    /// Number of extensions that reached the registered state.
    pub count: usize,
}

impl Event for ExtensionsRegistered {
    const KEY: &'static str = "talon.extensions_registered";
}
