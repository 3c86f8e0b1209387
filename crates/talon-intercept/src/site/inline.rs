//! Instruction-level detours backed by `retour`.
//!
//! Patches the prologue of an arbitrary function so calls land in the detour.
//! The trampoline produced by `retour` (relocated prologue plus a jump back)
//! is returned as the original entry point.

use std::fmt;

use retour::RawDetour;
use tracing::{debug, info, warn};

use talon_core::error::AppError;
use talon_core::result::AppResult;

use super::{BindingTable, CallSiteBinding, CallSiteInterceptor, EntryPoint, SiteKey};

/// Prologue-patching [`CallSiteInterceptor`] addressed by absolute code address.
pub struct InlineDetourer {
    initialized: bool,
    detours: BindingTable<RawDetour>,
}

impl InlineDetourer {
    /// Creates an uninitialized detourer.
    pub fn new() -> Self {
        Self {
            initialized: false,
            detours: BindingTable::new(),
        }
    }
}

impl Default for InlineDetourer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InlineDetourer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineDetourer")
            .field("initialized", &self.initialized)
            .field("bound", &self.detours.sites())
            .finish()
    }
}

impl CallSiteInterceptor for InlineDetourer {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn initialize(&mut self) -> AppResult<()> {
        if self.initialized {
            debug!("Inline detourer already initialized");
            return Ok(());
        }
        self.initialized = true;
        info!("Inline detourer initialized");
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        for site in self.detours.sites() {
            self.unbind(site);
        }
        self.initialized = false;
        info!("Inline detourer shut down");
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn bind(&mut self, site: SiteKey, detour: EntryPoint) -> AppResult<EntryPoint> {
        if !self.initialized {
            return Err(AppError::not_initialized("Inline detourer is not initialized"));
        }
        let SiteKey::Address(target) = site else {
            return Err(AppError::hook_failed(format!(
                "Inline detourer binds code addresses, got {site}"
            )));
        };
        if target == 0 || detour.is_null() {
            return Err(AppError::hook_failed(format!(
                "Cannot detour {site}: target or detour is null"
            )));
        }
        self.detours.ensure_unbound(site, self.name())?;

        let hook = unsafe { RawDetour::new(target as *const (), detour.as_ptr()) }
            .map_err(|e| AppError::hook_failed(format!("Cannot create detour at {site}: {e}")))?;
        unsafe { hook.enable() }
            .map_err(|e| AppError::hook_failed(format!("Cannot enable detour at {site}: {e}")))?;

        let original = EntryPoint::from_ptr(hook.trampoline() as *const ());
        self.detours.insert(
            CallSiteBinding {
                site,
                original,
                detour,
            },
            hook,
        );
        info!(site = %site, trampoline = %original, "Inline detour installed");
        Ok(original)
    }

    fn unbind(&mut self, site: SiteKey) {
        let Some((_, hook)) = self.detours.remove(site) else {
            return;
        };
        match unsafe { hook.disable() } {
            Ok(()) => info!(site = %site, "Inline detour removed"),
            Err(e) => warn!(site = %site, error = %e, "Failed to disable inline detour"),
        }
    }

    fn is_bound(&self, site: SiteKey) -> bool {
        self.detours.contains(site)
    }

    fn bindings(&self) -> Vec<CallSiteBinding> {
        self.detours.bindings()
    }
}

impl Drop for InlineDetourer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_core::error::ErrorKind;

    #[inline(never)]
    extern "C" fn scale(value: i32) -> i32 {
        let mut acc = std::hint::black_box(value);
        for _ in 0..std::hint::black_box(3) {
            acc = acc.wrapping_mul(2).wrapping_add(1);
        }
        acc
    }

    #[inline(never)]
    extern "C" fn replacement(value: i32) -> i32 {
        std::hint::black_box(value) - 1000
    }

    fn call(f: extern "C" fn(i32) -> i32, value: i32) -> i32 {
        std::hint::black_box(f)(value)
    }

    #[test]
    fn test_detour_redirects_and_trampoline_reaches_original() {
        let expected = call(scale, 1);
        let mut detourer = InlineDetourer::new();
        detourer.initialize().expect("init");

        let site = SiteKey::Address(scale as usize);
        let original = detourer
            .bind(site, EntryPoint::from_ptr(replacement as *const ()))
            .expect("bind");

        assert_eq!(call(scale, 1), -999);
        let trampoline: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(original.as_ptr()) };
        assert_eq!(trampoline(1), expected);

        detourer.unbind(site);
        assert_eq!(call(scale, 1), expected);
        detourer.unbind(site);
    }

    #[test]
    fn test_null_and_index_sites_are_rejected() {
        let mut detourer = InlineDetourer::new();
        detourer.initialize().expect("init");
        let detour = EntryPoint::from_ptr(replacement as *const ());

        let null = detourer.bind(SiteKey::Address(0), detour).expect_err("null");
        assert_eq!(null.kind, ErrorKind::HookFailed);
        let index = detourer.bind(SiteKey::Index(3), detour).expect_err("index");
        assert_eq!(index.kind, ErrorKind::HookFailed);
        assert!(detourer.bindings().is_empty());
    }

    #[test]
    fn test_initialize_and_shutdown_are_idempotent() {
        let mut detourer = InlineDetourer::new();
        detourer.shutdown();
        detourer.initialize().expect("first");
        detourer.initialize().expect("second");
        detourer.shutdown();
        detourer.shutdown();
        assert!(!detourer.is_initialized());

        let err = detourer
            .bind(SiteKey::Address(0x1000), EntryPoint::from_ptr(replacement as *const ()))
            .expect_err("not initialized");
        assert_eq!(err.kind, ErrorKind::NotInitialized);
    }
}
