//! Extension manager: discovery, loading, registration and unloading.
//!
//! Every extension moves through
//! `Discovered → Loaded → Registered → Unregistering → Unloaded`
//! without skipping a step. Faults in extension code are contained at each
//! boundary:
//! - `load` rolls back completely on any failure, closing the library.
//! - `register_all` keeps going when one extension fails or panics; the
//!   failed extension stays `Loaded` and is not offered registration again.
//! - `unload_all` keeps going when `on_unregister` fails or panics.
//!
//! Actions an extension queued are bound to it: once its library is closed
//! they are skipped instead of run, and leaked instead of dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use talon_core::config::ExtensionsConfig;
use talon_core::error::AppError;
use talon_core::guard::isolate;
use talon_core::result::AppResult;

use crate::api::context::{ActionGate, HostContext, Registrations};
use crate::ffi::abi::{DestroyExtensionFn, ExtensionHandle, TALON_ABI_VERSION};
use crate::ffi::safety;
use crate::loader::{ExtensionLibrary, LibraryOpener, NativeOpener};
use crate::registry::ExtensionInfo;

/// Lifecycle state of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    /// Found on disk, not yet opened.
    Discovered,
    /// Library open and instance created.
    Loaded,
    /// `on_register` succeeded.
    Registered,
    /// Being torn down.
    Unregistering,
    /// Destroyed and closed.
    Unloaded,
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Loaded => "loaded",
            Self::Registered => "registered",
            Self::Unregistering => "unregistering",
            Self::Unloaded => "unloaded",
        };
        f.write_str(s)
    }
}

/// Read-only view of a loaded extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSnapshot {
    /// Metadata reported by the extension.
    pub info: ExtensionInfo,
    /// Library path.
    pub path: PathBuf,
    /// Current state.
    pub state: ExtensionState,
    /// When the library was loaded.
    pub loaded_at: DateTime<Utc>,
}

/// One successfully loaded library.
///
/// Field order matters: `library` is dropped (closed) last.
struct LoadedExtension {
    info: ExtensionInfo,
    path: PathBuf,
    state: ExtensionState,
    loaded_at: DateTime<Utc>,
    handle: NonNull<ExtensionHandle>,
    destroy: DestroyExtensionFn,
    registrations: Option<Rc<Registrations>>,
    refused: bool,
    gate: ActionGate,
    library: Box<dyn ExtensionLibrary>,
}

impl LoadedExtension {
    fn snapshot(&self) -> ExtensionSnapshot {
        ExtensionSnapshot {
            info: self.info.clone(),
            path: self.path.clone(),
            state: self.state,
            loaded_at: self.loaded_at,
        }
    }

    fn transition(&mut self, next: ExtensionState) {
        debug!(extension = %self.info.name, from = %self.state, to = %next, "Extension state change");
        self.state = next;
    }

    /// Runs `on_unregister`, releases registrations, destroys the instance.
    ///
    /// The library itself closes when `self` is dropped on return.
    fn tear_down(mut self) {
        let was_registered = self.state == ExtensionState::Registered;
        self.transition(ExtensionState::Unregistering);

        if was_registered {
            let name = self.info.name.clone();
            match unsafe { safety::instance_mut(self.handle) } {
                Some(instance) => match isolate(|| instance.on_unregister()) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(extension = %name, error = %e, "Extension unregister failed"),
                    Err(panic) => error!(extension = %name, panic = %panic, "Extension panicked during unregister"),
                },
                None => warn!(extension = %name, "Extension handle has no instance"),
            }
        }

        if let Some(registrations) = self.registrations.take() {
            registrations.release(&self.info.name);
        }
        self.gate.close();

        unsafe { (self.destroy)(self.handle.as_ptr()) };
        self.transition(ExtensionState::Unloaded);
        info!(
            extension = %self.info.name,
            path = %self.library.path().display(),
            "Extension unloaded"
        );
    }
}

/// Loads and manages extension libraries.
pub struct ExtensionLoader {
    opener: Box<dyn LibraryOpener>,
    library_extension: String,
    extensions: Vec<LoadedExtension>,
}

impl ExtensionLoader {
    /// Creates a loader that opens libraries through `opener` and discovers
    /// files ending in `.{library_extension}`.
    pub fn new(opener: Box<dyn LibraryOpener>, library_extension: impl Into<String>) -> Self {
        Self {
            opener,
            library_extension: library_extension.into(),
            extensions: Vec::new(),
        }
    }

    /// Creates a loader for platform shared libraries.
    pub fn native(config: &ExtensionsConfig) -> Self {
        Self::new(Box::new(NativeOpener), config.library_extension.clone())
    }

    /// Loads every library directly inside `directory`, returning how many loaded.
    ///
    /// Subdirectories are not scanned. A missing or non-directory path logs and
    /// returns 0.
    pub fn discover_and_load(&mut self, directory: &Path) -> usize {
        if !directory.is_dir() {
            warn!(directory = %directory.display(), "Extension directory does not exist");
            return 0;
        }

        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(directory = %directory.display(), error = %e, "Cannot read extension directory");
                return 0;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.is_candidate(path))
            .collect();
        candidates.sort();

        let loaded = candidates
            .iter()
            .inspect(|path| {
                debug!(path = %path.display(), state = %ExtensionState::Discovered, "Extension discovered")
            })
            .filter(|path| self.load(path))
            .count();

        info!(
            directory = %directory.display(),
            discovered = candidates.len(),
            loaded,
            "Extension discovery complete"
        );
        loaded
    }

    fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.library_extension))
    }

    /// Loads the library at `path`. Returns whether it loaded.
    ///
    /// On failure nothing is kept: the instance (if any) is destroyed and the
    /// library is closed.
    pub fn load(&mut self, path: &Path) -> bool {
        match self.try_load(path) {
            Ok(extension) => {
                info!(
                    extension = %extension.info.name,
                    version = %extension.info.version,
                    author = %extension.info.author,
                    path = %path.display(),
                    "Extension loaded"
                );
                self.extensions.push(extension);
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Extension failed to load");
                false
            }
        }
    }

    fn try_load(&self, path: &Path) -> AppResult<LoadedExtension> {
        let library = self.opener.open(path)?;
        let create = library.factory()?;
        let destroy = library.destructor()?;

        let handle = NonNull::new(unsafe { create() }).ok_or_else(|| {
            AppError::load_failed(format!("Factory of '{}' returned null", path.display()))
        })?;

        let version = unsafe { safety::abi_version(handle) };
        if version != TALON_ABI_VERSION {
            unsafe { destroy(handle.as_ptr()) };
            return Err(AppError::load_failed(format!(
                "'{}' targets ABI version {version}, host expects {TALON_ABI_VERSION}",
                path.display()
            )));
        }

        let info = match unsafe { safety::instance_mut(handle) }.map(|instance| isolate(|| instance.info())) {
            Some(Ok(info)) => info,
            Some(Err(panic)) => {
                unsafe { destroy(handle.as_ptr()) };
                return Err(AppError::load_failed(format!(
                    "Extension '{}' panicked while reporting its info: {panic}",
                    path.display()
                )));
            }
            None => {
                unsafe { destroy(handle.as_ptr()) };
                return Err(AppError::load_failed(format!(
                    "Factory of '{}' returned a handle without an instance",
                    path.display()
                )));
            }
        };

        Ok(LoadedExtension {
            info,
            path: path.to_path_buf(),
            state: ExtensionState::Loaded,
            loaded_at: Utc::now(),
            handle,
            destroy,
            registrations: None,
            refused: false,
            gate: ActionGate::new(),
            library,
        })
    }

    /// Offers registration to every extension in the `Loaded` state.
    ///
    /// Returns how many reached `Registered` in this call. A failing or
    /// panicking extension is logged, has whatever it registered released,
    /// and stays `Loaded`; later calls skip it.
    pub fn register_all(&mut self, host: &HostContext) -> usize {
        let mut registered = 0;

        for extension in &mut self.extensions {
            if extension.state != ExtensionState::Loaded || extension.refused {
                continue;
            }
            let name = extension.info.name.clone();
            let Some(instance) = (unsafe { safety::instance_mut(extension.handle) }) else {
                warn!(extension = %name, "Extension handle has no instance");
                continue;
            };

            let (ctx, registrations) = host.scoped(&name, &extension.gate);
            let failure = match isolate(|| instance.on_register(&ctx)) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("panicked: {panic}")),
            };

            match failure {
                None => {
                    extension.registrations = Some(registrations);
                    extension.transition(ExtensionState::Registered);
                    registered += 1;
                    info!(extension = %name, "Extension registered");
                }
                Some(reason) => {
                    registrations.release(&name);
                    extension.refused = true;
                    error!(extension = %name, reason = %reason, "Extension registration failed");
                }
            }
        }

        info!(registered, total = self.extensions.len(), "Extension registration complete");
        registered
    }

    /// Unregisters, destroys and closes every extension, newest first.
    ///
    /// Safe to call repeatedly; later calls find nothing to do. Actions the
    /// extensions queued and the host has not run yet are left in the queue
    /// but never run; drain or clear the queue first to settle them.
    pub fn unload_all(&mut self) {
        if self.extensions.is_empty() {
            debug!("No extensions to unload");
            return;
        }

        let count = self.extensions.len();
        while let Some(extension) = self.extensions.pop() {
            extension.tear_down();
        }
        info!(count, "All extensions unloaded");
    }

    /// Snapshots of the loaded extensions, in load order.
    pub fn get_loaded(&self) -> Vec<ExtensionSnapshot> {
        self.extensions.iter().map(LoadedExtension::snapshot).collect()
    }

    /// Number of loaded extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns whether no extension is loaded.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionLoader")
            .field("library_extension", &self.library_extension)
            .field("extensions", &self.get_loaded())
            .finish()
    }
}

impl Drop for ExtensionLoader {
    fn drop(&mut self) {
        self.unload_all();
    }
}
