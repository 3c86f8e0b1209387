//! Call-site interception: one native redirection per site.
//!
//! A [`CallSiteInterceptor`] installs a detour at a single call site and hands
//! back the original entry point. Two variants exist:
//!
//! - [`vtable::VTablePatcher`] swaps one slot of a virtual-dispatch table.
//! - [`inline::InlineDetourer`] patches a function prologue (feature `inline-detour`).
//!
//! The function-call dispatch layer depends only on this trait, so it can be
//! driven by [`fake::FakeSiteInterceptor`] in tests.

pub mod fake;
#[cfg(all(
    feature = "inline-detour",
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub mod inline;
pub(crate) mod protect;
pub mod vtable;

use std::collections::HashMap;
use std::fmt;

use talon_core::error::AppError;
use talon_core::result::AppResult;

/// Identifies a call site: a dispatch-table slot or an absolute code address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteKey {
    /// Slot index inside a virtual-dispatch table.
    Index(u16),
    /// Absolute address of a function entry point.
    Address(usize),
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "slot#{index}"),
            Self::Address(addr) => write!(f, "{addr:#x}"),
        }
    }
}

/// A native code address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(usize);

impl EntryPoint {
    /// Wraps a raw code pointer.
    pub fn from_ptr(ptr: *const ()) -> Self {
        Self(ptr as usize)
    }

    /// Returns the raw code pointer.
    pub fn as_ptr(self) -> *const () {
        self.0 as *const ()
    }

    /// Returns the address as an integer.
    pub fn addr(self) -> usize {
        self.0
    }

    /// Returns whether this is the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An installed redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSiteBinding {
    /// The redirected site.
    pub site: SiteKey,
    /// Entry point that was in place before the redirection.
    pub original: EntryPoint,
    /// Entry point that now receives the calls.
    pub detour: EntryPoint,
}

/// Capability to redirect calls at individual sites.
///
/// `bind`/`unbind` mutate process-global native state; implementations take
/// `&mut self` so the borrow checker serializes them.
pub trait CallSiteInterceptor {
    /// Short name used in log records.
    fn name(&self) -> &'static str;

    /// Acquires the native hook engine. Calling it again once it has succeeded
    /// is a logged no-op; calling it again after a failure retries.
    fn initialize(&mut self) -> AppResult<()>;

    /// Unbinds every remaining site and releases the engine. Idempotent.
    fn shutdown(&mut self);

    /// Returns whether the engine is currently acquired.
    fn is_initialized(&self) -> bool;

    /// Installs `detour` at `site` and returns the original entry point.
    ///
    /// Fails with `HookFailed` when the site is already bound, invalid, or the
    /// native engine rejects the patch. A failed bind leaves no partial state.
    fn bind(&mut self, site: SiteKey, detour: EntryPoint) -> AppResult<EntryPoint>;

    /// Removes the redirection at `site`. Unbinding an unbound site is a no-op.
    fn unbind(&mut self, site: SiteKey);

    /// Returns whether `site` currently carries a redirection.
    fn is_bound(&self, site: SiteKey) -> bool;

    /// Returns every active binding.
    fn bindings(&self) -> Vec<CallSiteBinding>;
}

/// Per-site bookkeeping shared by the interceptor variants.
///
/// Holds at most one binding per [`SiteKey`], together with whatever native
/// state the variant needs to undo it.
#[derive(Debug)]
pub(crate) struct BindingTable<S> {
    entries: HashMap<SiteKey, (CallSiteBinding, S)>,
}

impl<S> BindingTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Fails with `HookFailed` if `site` already carries a binding.
    pub(crate) fn ensure_unbound(&self, site: SiteKey, engine: &str) -> AppResult<()> {
        if self.entries.contains_key(&site) {
            return Err(AppError::hook_failed(format!(
                "{engine}: site {site} is already bound; unbind it first"
            )));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, binding: CallSiteBinding, state: S) {
        self.entries.insert(binding.site, (binding, state));
    }

    pub(crate) fn remove(&mut self, site: SiteKey) -> Option<(CallSiteBinding, S)> {
        self.entries.remove(&site)
    }

    pub(crate) fn contains(&self, site: SiteKey) -> bool {
        self.entries.contains_key(&site)
    }

    pub(crate) fn sites(&self) -> Vec<SiteKey> {
        let mut sites: Vec<SiteKey> = self.entries.keys().copied().collect();
        sites.sort();
        sites
    }

    pub(crate) fn bindings(&self) -> Vec<CallSiteBinding> {
        let mut bindings: Vec<CallSiteBinding> =
            self.entries.values().map(|(binding, _)| *binding).collect();
        bindings.sort_by_key(|b| b.site);
        bindings
    }
}
