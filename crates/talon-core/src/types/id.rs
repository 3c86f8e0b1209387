//! Process-unique numeric identifiers for hooks and subscriptions.
//!
//! Each identifier type draws from its own process-wide counter. Values are
//! monotonically increasing, start at 1, and are never reused, even after the
//! registration they named has been removed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Macro to define a newtype ID wrapper around a process-wide `u64` counter.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next identifier from the process-wide counter.
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Wraps a raw value, e.g. one handed back across the extension ABI.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of a function-call hook registration.
    HookId
);

define_id!(
    /// Identifier of an event-bus subscription.
    SubscriptionId
);
