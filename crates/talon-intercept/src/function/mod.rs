//! Function-call interception: hook chains keyed by function name.

pub mod call;
pub mod dispatcher;
pub mod interceptor;
pub mod native;
pub(crate) mod registry;

pub use call::{DispatchFn, IdentityResolver, InterceptedCall, NulTerminatedNameResolver};
pub use dispatcher::DispatchOutcome;
pub use interceptor::FunctionInterceptor;
pub use native::{native_dispatch, native_dispatch_entry};
pub use registry::HookCallback;
