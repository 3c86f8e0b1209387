//! Convenience macros for extension development.

/// Generates the two C-linkage exports an extension library must provide.
///
/// The argument is an expression producing the extension instance; it is
/// evaluated each time the host calls the factory. Panics from the
/// constructor, the entry points and `Drop` are contained in the library.
///
/// # Example
/// ```rust,ignore
/// use talon_plugin_sdk::prelude::*;
///
/// struct Greeter;
///
/// impl Extension for Greeter {
///     fn info(&self) -> ExtensionInfo {
///         ExtensionInfo::new("greeter", "0.1.0")
///     }
///
///     fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()> {
///         ctx.log().info("hello");
///         Ok(())
///     }
/// }
///
/// export_extension!(Greeter);
/// ```
#[macro_export]
macro_rules! export_extension {
    ($constructor:expr) => {
        /// Extension factory export. Returns null if construction panics.
        #[unsafe(no_mangle)]
        pub extern "C" fn talon_extension_create() -> *mut $crate::ffi::abi::ExtensionHandle {
            $crate::ffi::safety::create_handle(|| $constructor)
        }

        /// Extension destructor export.
        ///
        /// # Safety
        ///
        /// `handle` must come from `talon_extension_create` in this library.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn talon_extension_destroy(handle: *mut $crate::ffi::abi::ExtensionHandle) {
            unsafe { $crate::ffi::safety::destroy_handle(handle) }
        }
    };
}

/// Builds an [`ExtensionInfo`](crate::registry::ExtensionInfo) from named fields.
///
/// # Example
/// ```rust,ignore
/// let info = extension_info!(
///     name: "damage-scaler",
///     version: "0.1.0",
///     author: "Talon Team",
///     description: "Scales incoming damage"
/// );
/// ```
#[macro_export]
macro_rules! extension_info {
    (
        name: $name:expr,
        version: $version:expr
    ) => {
        $crate::registry::ExtensionInfo::new($name, $version)
    };
    (
        name: $name:expr,
        version: $version:expr,
        author: $author:expr,
        description: $desc:expr
    ) => {
        $crate::registry::ExtensionInfo::new($name, $version)
            .with_author($author)
            .with_description($desc)
    };
}
