//! Prelude for convenient imports.

pub use talon_core::error::{AppError, ErrorKind};
pub use talon_core::result::AppResult;
pub use talon_core::types::{HookId, SubscriptionId};
pub use talon_intercept::InterceptedCall;

pub use crate::api::config::ConfigSection;
pub use crate::api::context::{ActionSink, ExtensionContext};
pub use crate::api::log::{ExtensionLogger, LogLevel};
pub use crate::events::{Event, EventBus, ExtensionsRegistered, ShutdownEvent, TickEvent};
pub use crate::registry::{Extension, ExtensionInfo};

pub use crate::{export_extension, extension_info};
