//! Virtual-dispatch-table patcher.
//!
//! Redirects calls by swapping a single slot of a dispatch table. The table is
//! located lazily by a host-supplied [`TableLocator`] when the patcher is
//! initialized, because the owning object often does not exist yet when the
//! runtime is injected. A locator that comes back empty makes `initialize`
//! fail cleanly so the host can retry later.

use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, info, warn};

use talon_core::error::AppError;
use talon_core::result::AppResult;

use super::protect::write_slot;
use super::{BindingTable, CallSiteBinding, CallSiteInterceptor, EntryPoint, SiteKey};

/// A located dispatch table: base pointer plus slot count.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTable {
    base: NonNull<*const ()>,
    len: usize,
}

impl DispatchTable {
    /// Describes the table at `base` with `len` slots.
    ///
    /// # Safety
    ///
    /// `base` must point to `len` consecutive, aligned function-pointer slots
    /// that stay mapped for as long as the patcher holds bindings on them.
    pub unsafe fn new(base: NonNull<*const ()>, len: usize) -> Self {
        Self { base, len }
    }

    /// Returns the slot count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: u16) -> Option<*mut *const ()> {
        let index = usize::from(index);
        (index < self.len).then(|| unsafe { self.base.as_ptr().add(index) })
    }
}

/// Finds the dispatch table to patch; `None` means "not available yet".
pub type TableLocator = Box<dyn FnMut() -> Option<DispatchTable>>;

/// Slot-swapping [`CallSiteInterceptor`].
pub struct VTablePatcher {
    locator: TableLocator,
    table: Option<DispatchTable>,
    bindings: BindingTable<()>,
}

impl VTablePatcher {
    /// Creates a patcher that resolves its table on `initialize`.
    pub fn new(locator: TableLocator) -> Self {
        Self {
            locator,
            table: None,
            bindings: BindingTable::new(),
        }
    }

    /// Creates a patcher over an already-known table.
    pub fn with_table(table: DispatchTable) -> Self {
        Self::new(Box::new(move || Some(table)))
    }

    /// Returns the bound sites in ascending order.
    pub fn bound_sites(&self) -> Vec<SiteKey> {
        self.bindings.sites()
    }
}

impl fmt::Debug for VTablePatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VTablePatcher")
            .field("table", &self.table)
            .field("bound", &self.bindings.sites())
            .finish()
    }
}

impl CallSiteInterceptor for VTablePatcher {
    fn name(&self) -> &'static str {
        "vtable"
    }

    fn initialize(&mut self) -> AppResult<()> {
        if self.table.is_some() {
            debug!("VTable patcher already initialized");
            return Ok(());
        }

        let table = (self.locator)()
            .ok_or_else(|| AppError::hook_failed("Dispatch table is not available yet"))?;
        if table.is_empty() {
            return Err(AppError::hook_failed("Dispatch table has no slots"));
        }

        info!(
            base = %format!("{:#x}", table.base.as_ptr() as usize),
            slots = table.len,
            "VTable patcher initialized"
        );
        self.table = Some(table);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.table.is_none() {
            return;
        }

        for site in self.bindings.sites() {
            self.unbind(site);
        }
        self.table = None;
        info!("VTable patcher shut down");
    }

    fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    fn bind(&mut self, site: SiteKey, detour: EntryPoint) -> AppResult<EntryPoint> {
        let table = self
            .table
            .ok_or_else(|| AppError::not_initialized("VTable patcher is not initialized"))?;

        let SiteKey::Index(index) = site else {
            return Err(AppError::hook_failed(format!(
                "VTable patcher binds slot indices, got address {site}"
            )));
        };
        if detour.is_null() {
            return Err(AppError::hook_failed("Detour entry point is null"));
        }
        self.bindings.ensure_unbound(site, self.name())?;

        let slot = table.slot(index).ok_or_else(|| {
            AppError::hook_failed(format!(
                "Slot {index} is out of range for a table of {} slots",
                table.len
            ))
        })?;

        let original = EntryPoint::from_ptr(unsafe { std::ptr::read_volatile(slot) });
        if original.is_null() {
            return Err(AppError::hook_failed(format!("Slot {index} holds a null entry")));
        }

        unsafe { write_slot(slot, detour.as_ptr())? };

        self.bindings.insert(
            CallSiteBinding {
                site,
                original,
                detour,
            },
            (),
        );
        info!(site = %site, original = %original, detour = %detour, "Dispatch slot bound");
        Ok(original)
    }

    fn unbind(&mut self, site: SiteKey) {
        let (Some(table), SiteKey::Index(index)) = (self.table, site) else {
            return;
        };
        let Some((binding, ())) = self.bindings.remove(site) else {
            return;
        };
        let Some(slot) = table.slot(index) else {
            return;
        };

        match unsafe { write_slot(slot, binding.original.as_ptr()) } {
            Ok(()) => info!(site = %site, "Dispatch slot restored"),
            Err(e) => warn!(site = %site, error = %e, "Failed to restore dispatch slot"),
        }
    }

    fn is_bound(&self, site: SiteKey) -> bool {
        self.bindings.contains(site)
    }

    fn bindings(&self) -> Vec<CallSiteBinding> {
        self.bindings.bindings()
    }
}

impl Drop for VTablePatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
