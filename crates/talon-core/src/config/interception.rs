//! Native interception bring-up configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for installing the function-call dispatch hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptionConfig {
    /// Maximum number of bring-up attempts before giving up.
    #[serde(default = "default_attempts")]
    pub bring_up_attempts: u32,
    /// Fixed delay between bring-up attempts, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub bring_up_delay_ms: u64,
    /// Dispatch-table slot of the intercepted dispatch function.
    #[serde(default = "default_dispatch_index")]
    pub dispatch_index: u16,
}

impl InterceptionConfig {
    /// Returns the bring-up retry delay.
    pub fn bring_up_delay(&self) -> Duration {
        Duration::from_millis(self.bring_up_delay_ms)
    }
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            bring_up_attempts: default_attempts(),
            bring_up_delay_ms: default_delay_ms(),
            dispatch_index: default_dispatch_index(),
        }
    }
}

fn default_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    100
}

fn default_dispatch_index() -> u16 {
    68
}
