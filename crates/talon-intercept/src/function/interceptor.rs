//! Name-keyed, multi-subscriber function-call interception.
//!
//! A [`FunctionInterceptor`] owns one [`CallSiteInterceptor`] and binds the
//! [`native_dispatch`](super::native::native_dispatch) detour at a single,
//! well-known dispatch site. Every call through that site is resolved to a
//! function name and run through the hook chain for that name.
//!
//! All state lives in `Cell`/`RefCell`: the interceptor belongs to the host's
//! single execution context. Hook callbacks may add or remove hooks (including
//! themselves) while they run, because the chain is snapshotted before the
//! first callback is invoked.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use talon_core::error::AppError;
use talon_core::result::AppResult;
use talon_core::types::HookId;

use crate::site::{CallSiteInterceptor, EntryPoint, SiteKey};

use super::call::{DispatchFn, IdentityResolver, InterceptedCall};
use super::dispatcher::{DispatchOutcome, run_chain};
use super::native;
use super::registry::{HookCallback, HookTable};

/// Function-call interceptor built on one call-site binding.
pub struct FunctionInterceptor {
    site: RefCell<Box<dyn CallSiteInterceptor>>,
    dispatch_site: SiteKey,
    resolver: Box<dyn IdentityResolver>,
    original: Cell<Option<DispatchFn>>,
    hooks: RefCell<HookTable>,
}

impl FunctionInterceptor {
    /// Creates an uninitialized interceptor that will bind `dispatch_site`
    /// through `site` and name calls with `resolver`.
    ///
    /// The interceptor is reference counted because the native detour and
    /// every extension context refer back to it.
    pub fn new(
        site: Box<dyn CallSiteInterceptor>,
        dispatch_site: SiteKey,
        resolver: impl IdentityResolver + 'static,
    ) -> Rc<Self> {
        Rc::new(Self {
            site: RefCell::new(site),
            dispatch_site,
            resolver: Box::new(resolver),
            original: Cell::new(None),
            hooks: RefCell::new(HookTable::new()),
        })
    }

    /// Acquires the call-site engine and binds the dispatch detour.
    ///
    /// A second call after success is a logged no-op. After a failure nothing
    /// is left bound, so the call can be retried.
    pub fn initialize(&self) -> AppResult<()> {
        if self.is_initialized() {
            debug!(site = %self.dispatch_site, "Function interceptor already initialized");
            return Ok(());
        }

        let mut site = self.site.borrow_mut();
        site.initialize()?;
        let original = site.bind(self.dispatch_site, native::native_dispatch_entry())?;
        let Some(dispatch) = (unsafe { native::as_dispatch_fn(original) }) else {
            site.unbind(self.dispatch_site);
            return Err(AppError::hook_failed(format!(
                "Dispatch site {} has a null original entry point",
                self.dispatch_site
            )));
        };

        self.original.set(Some(dispatch));
        native::install(self, original);
        info!(
            engine = site.name(),
            site = %self.dispatch_site,
            original = %original,
            "Function interceptor initialized"
        );
        Ok(())
    }

    /// Unbinds the dispatch detour and releases the engine. Idempotent.
    ///
    /// Hooks stay registered; they simply stop firing.
    pub fn shutdown(&self) {
        if !self.is_initialized() {
            return;
        }

        native::uninstall(self);
        self.original.set(None);
        let mut site = self.site.borrow_mut();
        site.unbind(self.dispatch_site);
        site.shutdown();
        info!(site = %self.dispatch_site, "Function interceptor shut down");
    }

    /// Returns whether the dispatch detour is bound.
    pub fn is_initialized(&self) -> bool {
        self.original.get().is_some()
    }

    /// Returns the dispatch site this interceptor binds.
    pub fn dispatch_site(&self) -> SiteKey {
        self.dispatch_site
    }

    /// Returns the original entry point of the dispatch site, once bound.
    pub fn original(&self) -> Option<EntryPoint> {
        self.original
            .get()
            .map(|f| EntryPoint::from_ptr(f as *const ()))
    }

    /// Returns whether native calls on this thread are routed here.
    pub fn is_routing_native_calls(&self) -> bool {
        native::is_active(self)
    }

    /// Appends `callback` to the hook chain of `function`.
    ///
    /// Hooks can be added before `initialize`; they fire once the dispatch
    /// site is bound.
    pub fn add_hook<F>(&self, function: impl AsRef<str>, callback: F) -> HookId
    where
        F: Fn(&mut InterceptedCall<'_>) -> bool + 'static,
    {
        self.add_hook_callback(function.as_ref(), Rc::new(callback))
    }

    /// Appends an already type-erased callback to the hook chain of `function`.
    pub fn add_hook_callback(&self, function: &str, callback: HookCallback) -> HookId {
        let id = self.hooks.borrow_mut().add(function, callback);
        info!(hook_id = %id, function = %function, "Hook added");
        id
    }

    /// Removes the hook with `id`.
    ///
    /// An unknown id is logged and reported as `HookNotFound`; callers are not
    /// expected to abort on it.
    pub fn remove_hook(&self, id: HookId) -> AppResult<()> {
        match self.hooks.borrow_mut().remove(id) {
            Some(function) => {
                info!(hook_id = %id, function = %function, "Hook removed");
                Ok(())
            }
            None => {
                warn!(hook_id = %id, "Hook to remove was not found");
                Err(AppError::hook_not_found(format!("Hook {id} is not registered")))
            }
        }
    }

    /// Removes every hook on `function`, returning how many were removed.
    pub fn remove_hooks_for_function(&self, function: &str) -> usize {
        let removed = self.hooks.borrow_mut().remove_function(function);
        if removed > 0 {
            info!(function = %function, removed, "Hooks removed for function");
        }
        removed
    }

    /// Removes every hook, returning how many were removed.
    pub fn clear_all_hooks(&self) -> usize {
        let removed = self.hooks.borrow_mut().clear();
        info!(removed, "All hooks cleared");
        removed
    }

    /// Number of hooks on `function`.
    pub fn hook_count(&self, function: &str) -> usize {
        self.hooks.borrow().count(function)
    }

    /// Number of hooks across all functions.
    pub fn total_hooks(&self) -> usize {
        self.hooks.borrow().total()
    }

    /// Names of all functions with at least one hook, sorted.
    pub fn hooked_functions(&self) -> Vec<String> {
        self.hooks.borrow().functions()
    }

    /// Resolves the call and runs its hook chain without invoking the original.
    pub fn evaluate(
        &self,
        object: *mut c_void,
        function: *mut c_void,
        params: *mut c_void,
    ) -> DispatchOutcome {
        let Some(name) = self.resolver.resolve(function) else {
            return DispatchOutcome::Unresolved;
        };

        let chain = self.hooks.borrow().snapshot(&name);
        if chain.is_empty() {
            return DispatchOutcome::NoHooks { function: name };
        }

        let mut call = InterceptedCall::new(object, function, params, &name);
        run_chain(&chain, &mut call)
    }

    /// Handles one intercepted call: runs the hook chain, then invokes the
    /// original unless a hook suppressed it.
    ///
    /// A suppressed call returns without a substitute result; whatever the
    /// caller observes from the do-nothing path is what it gets.
    ///
    /// # Safety
    ///
    /// The arguments must be valid for the original entry point of the
    /// dispatch site.
    pub unsafe fn dispatch(
        &self,
        object: *mut c_void,
        function: *mut c_void,
        params: *mut c_void,
    ) -> DispatchOutcome {
        let outcome = self.evaluate(object, function, params);
        if outcome.calls_original() {
            if let Some(original) = self.original.get() {
                unsafe { original(object, function, params) };
            }
        }
        outcome
    }
}

impl fmt::Debug for FunctionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionInterceptor")
            .field("dispatch_site", &self.dispatch_site)
            .field("initialized", &self.is_initialized())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Drop for FunctionInterceptor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
