//! Dynamic extension libraries.
//!
//! [`ExtensionLoader`](crate::manager::ExtensionLoader) opens libraries through
//! the [`LibraryOpener`] seam. [`NativeOpener`] uses `libloading`; tests and
//! hosts that link extensions statically supply their own opener.
//!
//! A library stays open for as long as its [`ExtensionLibrary`] value lives
//! and is closed when that value is dropped, on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use talon_core::error::{AppError, ErrorKind};
use talon_core::result::AppResult;

use crate::ffi::abi::{CREATE_SYMBOL, CreateExtensionFn, DESTROY_SYMBOL, DestroyExtensionFn};

/// An open extension library.
pub trait ExtensionLibrary {
    /// Path the library was opened from.
    fn path(&self) -> &Path;

    /// Resolves the factory export.
    fn factory(&self) -> AppResult<CreateExtensionFn>;

    /// Resolves the destructor export.
    fn destructor(&self) -> AppResult<DestroyExtensionFn>;
}

/// Opens extension libraries.
pub trait LibraryOpener {
    /// Opens the library at `path`; failure is a `LoadFailed` error.
    fn open(&self, path: &Path) -> AppResult<Box<dyn ExtensionLibrary>>;
}

/// A platform shared library loaded with `libloading`.
pub struct NativeLibrary {
    path: PathBuf,
    library: Option<libloading::Library>,
}

impl NativeLibrary {
    /// Opens the shared library at `path`.
    ///
    /// # Safety
    ///
    /// Opening a library runs its initializers. Only open trusted extensions.
    pub unsafe fn open(path: &Path) -> AppResult<Self> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            AppError::with_source(
                ErrorKind::LoadFailed,
                format!("Failed to open extension library '{}'", path.display()),
                e,
            )
        })?;
        debug!(path = %path.display(), "Extension library opened");
        Ok(Self {
            path: path.to_path_buf(),
            library: Some(library),
        })
    }

    fn symbol<T: Copy>(&self, name: &[u8]) -> AppResult<T> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| AppError::internal("Extension library is already closed"))?;
        let symbol = unsafe { library.get::<T>(name) }.map_err(|e| {
            AppError::with_source(
                ErrorKind::LoadFailed,
                format!(
                    "Extension '{}' is missing export '{}'",
                    self.path.display(),
                    String::from_utf8_lossy(name)
                ),
                e,
            )
        })?;
        Ok(*symbol)
    }
}

impl ExtensionLibrary for NativeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn factory(&self) -> AppResult<CreateExtensionFn> {
        self.symbol(CREATE_SYMBOL)
    }

    fn destructor(&self) -> AppResult<DestroyExtensionFn> {
        self.symbol(DESTROY_SYMBOL)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("open", &self.library.is_some())
            .finish()
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        let Some(library) = self.library.take() else {
            return;
        };
        match library.close() {
            Ok(()) => debug!(path = %self.path.display(), "Extension library closed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to close extension library"),
        }
    }
}

/// [`LibraryOpener`] for platform shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOpener;

impl LibraryOpener for NativeOpener {
    fn open(&self, path: &Path) -> AppResult<Box<dyn ExtensionLibrary>> {
        let library = unsafe { NativeLibrary::open(path)? };
        Ok(Box::new(library))
    }
}
