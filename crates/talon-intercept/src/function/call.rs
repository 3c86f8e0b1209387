//! The intercepted call as seen by hook callbacks, and call-identity resolution.

use std::ffi::{CStr, c_char, c_void};

/// Signature of the native dispatch site: `(object, function, params)`.
///
/// The detour installed at the dispatch site and the original entry point it
/// forwards to both have this shape.
pub type DispatchFn = unsafe extern "C" fn(object: *mut c_void, function: *mut c_void, params: *mut c_void);

/// One intercepted call, handed to every hook in the chain.
///
/// Hooks receive the same `InterceptedCall` in registration order, so edits
/// one hook makes to the parameter block are visible to the next one and to
/// the original entry point.
#[derive(Debug)]
pub struct InterceptedCall<'a> {
    object: *mut c_void,
    function: *mut c_void,
    params: *mut c_void,
    name: &'a str,
}

impl<'a> InterceptedCall<'a> {
    /// Wraps the raw call arguments together with the resolved identity.
    pub fn new(
        object: *mut c_void,
        function: *mut c_void,
        params: *mut c_void,
        name: &'a str,
    ) -> Self {
        Self {
            object,
            function,
            params,
            name,
        }
    }

    /// Resolved function name this call was dispatched under.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Receiver object of the call.
    pub fn object(&self) -> *mut c_void {
        self.object
    }

    /// Native function handle the identity was resolved from.
    pub fn function(&self) -> *mut c_void {
        self.function
    }

    /// Raw parameter block.
    pub fn params(&self) -> *mut c_void {
        self.params
    }

    /// Reinterprets the parameter block as `T`.
    ///
    /// Returns `None` when the call carries no parameter block.
    ///
    /// # Safety
    ///
    /// The parameter block must really be a `T` for this function, properly
    /// aligned, and not aliased elsewhere while the reference is alive.
    pub unsafe fn params_mut<T>(&mut self) -> Option<&mut T> {
        unsafe { self.params.cast::<T>().as_mut() }
    }
}

/// Turns a native function handle into the human-readable name hooks are keyed by.
///
/// Returning `None` means the identity could not be determined; the call is
/// then forwarded to the original without consulting any hook.
pub trait IdentityResolver {
    /// Resolves `function` to a name.
    fn resolve(&self, function: *mut c_void) -> Option<String>;
}

impl<F> IdentityResolver for F
where
    F: Fn(*mut c_void) -> Option<String>,
{
    fn resolve(&self, function: *mut c_void) -> Option<String> {
        self(function)
    }
}

/// Resolver for hosts whose function handles point at a NUL-terminated name.
#[derive(Debug)]
pub struct NulTerminatedNameResolver {
    _private: (),
}

impl NulTerminatedNameResolver {
    /// Creates the resolver.
    ///
    /// # Safety
    ///
    /// Every non-null function handle passed through the dispatch site must
    /// point to a NUL-terminated string that outlives the call.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl IdentityResolver for NulTerminatedNameResolver {
    fn resolve(&self, function: *mut c_void) -> Option<String> {
        if function.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(function.cast::<c_char>().cast_const()) };
        match name.to_str() {
            Ok(s) if !s.is_empty() => Some(s.to_string()),
            _ => None,
        }
    }
}
