//! FFI ABI definitions for extension libraries.
//!
//! An extension library exports exactly two C-linkage symbols:
//!
//! ```c
//! ExtensionHandle* talon_extension_create(void);
//! void             talon_extension_destroy(ExtensionHandle*);
//! ```
//!
//! Both are generated by [`export_extension!`](crate::export_extension).

use std::ffi::c_void;

/// ABI revision of [`ExtensionHandle`]. Bumped whenever its layout or the
/// [`Extension`](crate::registry::Extension) trait changes.
pub const TALON_ABI_VERSION: u32 = 1;

/// Name of the factory export.
pub const CREATE_SYMBOL: &[u8] = b"talon_extension_create";

/// Name of the destructor export.
pub const DESTROY_SYMBOL: &[u8] = b"talon_extension_destroy";

/// Opaque handle returned by the factory export.
#[repr(C)]
pub struct ExtensionHandle {
    /// ABI revision the library was built against. Always the first field.
    pub abi_version: u32,
    /// Boxed `Box<dyn Extension>`, owned by the library that created it.
    pub instance: *mut c_void,
}

/// Type signature of the factory export.
pub type CreateExtensionFn = unsafe extern "C" fn() -> *mut ExtensionHandle;

/// Type signature of the destructor export.
pub type DestroyExtensionFn = unsafe extern "C" fn(handle: *mut ExtensionHandle);
