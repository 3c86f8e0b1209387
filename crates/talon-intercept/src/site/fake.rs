//! In-memory [`CallSiteInterceptor`] for tests and simulated hosts.
//!
//! Does not touch native memory. Each site reports a configurable "original"
//! entry point, and the installed detours can be read back through a
//! [`FakeSiteHandle`] to drive dispatch manually.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use talon_core::error::AppError;
use talon_core::result::AppResult;

use super::{CallSiteBinding, CallSiteInterceptor, EntryPoint, SiteKey};

#[derive(Debug, Default)]
struct FakeState {
    initialized: bool,
    init_attempts: u32,
    failing_inits: u32,
    failing_binds: u32,
    originals: HashMap<SiteKey, EntryPoint>,
    bound: HashMap<SiteKey, CallSiteBinding>,
    unbinds: u32,
}

/// Fake call-site interceptor.
#[derive(Debug, Default)]
pub struct FakeSiteInterceptor {
    state: Rc<RefCell<FakeState>>,
}

/// Observer for a [`FakeSiteInterceptor`] that has been moved elsewhere.
#[derive(Debug, Clone)]
pub struct FakeSiteHandle {
    state: Rc<RefCell<FakeState>>,
}

impl FakeSiteInterceptor {
    /// Creates a fake with no configured sites.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `original` as the pre-existing entry point of `site`.
    pub fn with_original(self, site: SiteKey, original: EntryPoint) -> Self {
        self.state.borrow_mut().originals.insert(site, original);
        self
    }

    /// Makes the next `count` calls to `initialize` fail.
    pub fn failing_initializations(self, count: u32) -> Self {
        self.state.borrow_mut().failing_inits = count;
        self
    }

    /// Makes the next `count` calls to `bind` fail.
    pub fn failing_binds(self, count: u32) -> Self {
        self.state.borrow_mut().failing_binds = count;
        self
    }

    /// Returns an observer sharing this fake's state.
    pub fn handle(&self) -> FakeSiteHandle {
        FakeSiteHandle {
            state: self.state.clone(),
        }
    }
}

impl FakeSiteHandle {
    /// Number of `initialize` calls so far, successful or not.
    pub fn init_attempts(&self) -> u32 {
        self.state.borrow().init_attempts
    }

    /// Number of effective unbinds so far.
    pub fn unbind_count(&self) -> u32 {
        self.state.borrow().unbinds
    }

    /// Returns the detour currently installed at `site`.
    pub fn detour_at(&self, site: SiteKey) -> Option<EntryPoint> {
        self.state.borrow().bound.get(&site).map(|b| b.detour)
    }

    /// Returns whether the fake engine is acquired.
    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }
}

impl CallSiteInterceptor for FakeSiteInterceptor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn initialize(&mut self) -> AppResult<()> {
        let mut state = self.state.borrow_mut();
        state.init_attempts += 1;
        if state.initialized {
            return Ok(());
        }
        if state.failing_inits > 0 {
            state.failing_inits -= 1;
            return Err(AppError::hook_failed("Fake engine refused to initialize"));
        }
        state.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return;
        }
        state.unbinds += state.bound.len() as u32;
        state.bound.clear();
        state.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    fn bind(&mut self, site: SiteKey, detour: EntryPoint) -> AppResult<EntryPoint> {
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return Err(AppError::not_initialized("Fake engine is not initialized"));
        }
        if state.bound.contains_key(&site) {
            return Err(AppError::hook_failed(format!("fake: site {site} is already bound")));
        }
        if state.failing_binds > 0 {
            state.failing_binds -= 1;
            return Err(AppError::hook_failed(format!("fake: bind refused at {site}")));
        }
        let original = state
            .originals
            .get(&site)
            .copied()
            .ok_or_else(|| AppError::hook_failed(format!("fake: no entry point at {site}")))?;

        state.bound.insert(
            site,
            CallSiteBinding {
                site,
                original,
                detour,
            },
        );
        debug!(site = %site, "Fake site bound");
        Ok(original)
    }

    fn unbind(&mut self, site: SiteKey) {
        let mut state = self.state.borrow_mut();
        if state.bound.remove(&site).is_some() {
            state.unbinds += 1;
        }
    }

    fn is_bound(&self, site: SiteKey) -> bool {
        self.state.borrow().bound.contains_key(&site)
    }

    fn bindings(&self) -> Vec<CallSiteBinding> {
        let mut bindings: Vec<CallSiteBinding> =
            self.state.borrow().bound.values().copied().collect();
        bindings.sort_by_key(|b| b.site);
        bindings
    }
}
