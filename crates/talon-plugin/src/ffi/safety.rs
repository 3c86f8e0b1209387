//! FFI safety wrappers: converts between extension handles and Rust types.
//!
//! A panic may not unwind out of an `extern "C"` export, and a panic raised
//! by a library's copy of the standard library cannot be caught by the
//! host's. [`create_handle`] and [`destroy_handle`] therefore contain every
//! panic on the library's side of the boundary.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use talon_core::error::AppError;
use talon_core::guard::isolate;
use talon_core::result::AppResult;

use crate::api::context::ExtensionContext;
use crate::registry::{Extension, ExtensionInfo};

use super::abi::{ExtensionHandle, TALON_ABI_VERSION};

/// Boxes `extension` into a handle stamped with the current ABI version.
pub fn into_raw_handle(extension: Box<dyn Extension>) -> *mut ExtensionHandle {
    let instance = Box::into_raw(Box::new(extension)).cast::<c_void>();
    Box::into_raw(Box::new(ExtensionHandle {
        abi_version: TALON_ABI_VERSION,
        instance,
    }))
}

/// Runs an extension factory and boxes the result into a handle.
///
/// Returns null if `constructor` or the instance's `info` panics. The
/// instance is wrapped so that panics in `on_register` and `on_unregister`
/// come back as errors.
pub fn create_handle<T, F>(constructor: F) -> *mut ExtensionHandle
where
    T: Extension + 'static,
    F: FnOnce() -> T,
{
    let created = isolate(|| {
        let inner = constructor();
        let info = inner.info();
        Contained { inner, info }
    });
    match created {
        Ok(contained) => into_raw_handle(Box::new(contained)),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroys a handle produced by [`create_handle`]. A panic from the
/// extension's `Drop` is swallowed.
///
/// # Safety
///
/// Same contract as [`drop_raw_handle`].
pub unsafe fn destroy_handle(handle: *mut ExtensionHandle) {
    let _ = isolate(|| unsafe { drop_raw_handle(handle) });
}

/// Extension wrapper that turns panics into errors inside the library.
struct Contained<T> {
    inner: T,
    info: ExtensionInfo,
}

impl<T: Extension> Extension for Contained<T> {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }

    fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()> {
        isolate(|| self.inner.on_register(ctx))
            .unwrap_or_else(|panic| Err(AppError::registration_failed(format!("panicked: {panic}"))))
    }

    fn on_unregister(&mut self) -> AppResult<()> {
        isolate(|| self.inner.on_unregister())
            .unwrap_or_else(|panic| Err(AppError::internal(format!("panicked during unregister: {panic}"))))
    }
}

/// Destroys a handle produced by [`into_raw_handle`]. Null is ignored.
///
/// # Safety
///
/// `handle` must come from [`into_raw_handle`] in the same library and must
/// not be used afterwards.
pub unsafe fn drop_raw_handle(handle: *mut ExtensionHandle) {
    if handle.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(handle) };
    if !handle.instance.is_null() {
        drop(unsafe { Box::from_raw(handle.instance.cast::<Box<dyn Extension>>()) });
    }
}

/// Reads the ABI version stamped on a handle.
///
/// # Safety
///
/// `handle` must point to a live handle whose first field is a `u32`.
pub(crate) unsafe fn abi_version(handle: NonNull<ExtensionHandle>) -> u32 {
    unsafe { handle.as_ref().abi_version }
}

/// Borrows the extension behind a handle.
///
/// # Safety
///
/// `handle` must be live, carry [`TALON_ABI_VERSION`], and not be borrowed
/// elsewhere for `'a`.
pub(crate) unsafe fn instance_mut<'a>(handle: NonNull<ExtensionHandle>) -> Option<&'a mut dyn Extension> {
    let instance = unsafe { handle.as_ref().instance };
    let boxed = unsafe { instance.cast::<Box<dyn Extension>>().as_mut()? };
    Some(&mut **boxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::context::ActionGate;
    use crate::api::context::testing::host;
    use std::cell::Cell;
    use std::rc::Rc;
    use talon_core::error::ErrorKind;

    struct Tracked {
        dropped: Rc<Cell<bool>>,
    }

    impl Extension for Tracked {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo::new("tracked", "0.1.0")
        }

        fn on_register(&mut self, _ctx: &ExtensionContext) -> AppResult<()> {
            Ok(())
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    /// Panics wherever the host calls into it.
    struct Faulty;

    impl Extension for Faulty {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo::new("faulty", "0.1.0")
        }

        fn on_register(&mut self, _ctx: &ExtensionContext) -> AppResult<()> {
            panic!("register bug")
        }

        fn on_unregister(&mut self) -> AppResult<()> {
            panic!("unregister bug")
        }
    }

    impl Drop for Faulty {
        fn drop(&mut self) {
            panic!("drop bug");
        }
    }

    struct Nameless;

    impl Extension for Nameless {
        fn info(&self) -> ExtensionInfo {
            panic!("info bug")
        }

        fn on_register(&mut self, _ctx: &ExtensionContext) -> AppResult<()> {
            Ok(())
        }
    }

    extern "C" fn create_failing_constructor() -> *mut ExtensionHandle {
        create_handle(|| -> Tracked { panic!("constructor bug") })
    }

    extern "C" fn create_nameless() -> *mut ExtensionHandle {
        create_handle(|| Nameless)
    }

    extern "C" fn create_faulty() -> *mut ExtensionHandle {
        create_handle(|| Faulty)
    }

    extern "C" fn destroy(handle: *mut ExtensionHandle) {
        unsafe { destroy_handle(handle) };
    }

    #[test]
    fn test_handle_round_trip_and_drop() {
        let dropped = Rc::new(Cell::new(false));
        let raw = into_raw_handle(Box::new(Tracked {
            dropped: dropped.clone(),
        }));
        let handle = NonNull::new(raw).expect("non-null");

        assert_eq!(unsafe { abi_version(handle) }, TALON_ABI_VERSION);
        let instance = unsafe { instance_mut(handle) }.expect("instance");
        assert_eq!(instance.info().name, "tracked");

        unsafe { drop_raw_handle(raw) };
        assert!(dropped.get());
        unsafe { drop_raw_handle(std::ptr::null_mut()) };
    }

    #[test]
    fn test_panicking_factory_returns_null() {
        assert!(create_failing_constructor().is_null());
        assert!(create_nameless().is_null());
    }

    #[test]
    fn test_contained_extension_reports_panics_as_errors() {
        let raw = create_faulty();
        let handle = NonNull::new(raw).expect("non-null");
        let instance = unsafe { instance_mut(handle) }.expect("instance");
        assert_eq!(instance.info().name, "faulty");

        let (host, _) = host();
        let (ctx, _) = host.scoped("faulty", &ActionGate::new());
        let err = instance.on_register(&ctx).expect_err("register panics");
        assert_eq!(err.kind, ErrorKind::RegistrationFailed);
        assert!(err.to_string().contains("register bug"));

        let err = instance.on_unregister().expect_err("unregister panics");
        assert_eq!(err.kind, ErrorKind::Internal);

        destroy(raw);
        destroy(std::ptr::null_mut());
    }
}
