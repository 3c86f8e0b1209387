//! # talon-intercept
//!
//! Redirects native calls inside the host process.
//!
//! - [`site`] installs single redirections at dispatch-table slots or function
//!   prologues behind the [`CallSiteInterceptor`] capability.
//! - [`function`] builds the name-keyed, multi-subscriber hook layer on top of
//!   one such redirection.

pub mod function;
pub mod site;

pub use function::{DispatchOutcome, FunctionInterceptor, IdentityResolver, InterceptedCall};
pub use site::{CallSiteBinding, CallSiteInterceptor, EntryPoint, SiteKey};
