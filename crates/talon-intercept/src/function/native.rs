//! The native detour installed at the dispatch site.
//!
//! The detour is a plain `extern "C"` function, so it cannot capture the
//! interceptor. The interceptor that was initialized on a thread registers
//! itself in a thread-local slot; calls arriving on that thread are routed
//! through its hook chains. Calls arriving on any other thread, or after the
//! interceptor has shut down, go straight to the last known original.

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::site::EntryPoint;

use super::call::DispatchFn;
use super::interceptor::FunctionInterceptor;

thread_local! {
    static ACTIVE: Cell<*const FunctionInterceptor> = const { Cell::new(ptr::null()) };
}

static FALLBACK_ORIGINAL: AtomicUsize = AtomicUsize::new(0);

/// Routes this thread's dispatch-site calls to `interceptor`.
pub(crate) fn install(interceptor: &FunctionInterceptor, original: EntryPoint) {
    FALLBACK_ORIGINAL.store(original.addr(), Ordering::Release);
    ACTIVE.with(|active| active.set(interceptor));
}

/// Clears the routing if it still points at `interceptor`.
pub(crate) fn uninstall(interceptor: &FunctionInterceptor) {
    ACTIVE.with(|active| {
        if ptr::eq(active.get(), interceptor) {
            active.set(ptr::null());
        }
    });
}

/// Returns whether `interceptor` receives this thread's dispatch-site calls.
pub(crate) fn is_active(interceptor: &FunctionInterceptor) -> bool {
    ACTIVE.with(|active| ptr::eq(active.get(), interceptor))
}

/// Converts a non-null entry point into a callable dispatch function.
///
/// # Safety
///
/// `entry` must be the address of a function with the [`DispatchFn`] signature.
pub(crate) unsafe fn as_dispatch_fn(entry: EntryPoint) -> Option<DispatchFn> {
    if entry.is_null() {
        return None;
    }
    Some(unsafe { std::mem::transmute::<*const (), DispatchFn>(entry.as_ptr()) })
}

/// Detour bound at the dispatch site.
///
/// # Safety
///
/// Must only be reached through the dispatch site it was bound to, with the
/// arguments the host passes there.
pub unsafe extern "C" fn native_dispatch(object: *mut c_void, function: *mut c_void, params: *mut c_void) {
    let active = ACTIVE.with(Cell::get);
    if !active.is_null() {
        let interceptor = unsafe { &*active };
        unsafe { interceptor.dispatch(object, function, params) };
        return;
    }

    let fallback = EntryPoint::from_ptr(FALLBACK_ORIGINAL.load(Ordering::Acquire) as *const ());
    if let Some(original) = unsafe { as_dispatch_fn(fallback) } {
        unsafe { original(object, function, params) };
    }
}

/// Entry point of [`native_dispatch`], for binding.
pub fn native_dispatch_entry() -> EntryPoint {
    let detour: DispatchFn = native_dispatch;
    EntryPoint::from_ptr(detour as *const ())
}
