//! Extensions linked into the host binary.
//!
//! [`LinkedOpener`] serves a fixed set of pseudo-paths from extension crates
//! compiled into this executable and hands every other path to the platform
//! loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use talon_core::result::AppResult;
use talon_plugin::ffi::abi::{CreateExtensionFn, DestroyExtensionFn};
use talon_plugin::{ExtensionLibrary, LibraryOpener, NativeOpener};

/// Pseudo-path of the linked damage-scaler extension.
pub const DAMAGE_SCALER: &str = "linked/damage-scaler";

struct LinkedLibrary {
    path: PathBuf,
    create: CreateExtensionFn,
    destroy: DestroyExtensionFn,
}

impl ExtensionLibrary for LinkedLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn factory(&self) -> AppResult<CreateExtensionFn> {
        Ok(self.create)
    }

    fn destructor(&self) -> AppResult<DestroyExtensionFn> {
        Ok(self.destroy)
    }
}

pub struct LinkedOpener {
    linked: HashMap<PathBuf, (CreateExtensionFn, DestroyExtensionFn)>,
}

impl Default for LinkedOpener {
    fn default() -> Self {
        let mut linked = HashMap::new();
        linked.insert(
            PathBuf::from(DAMAGE_SCALER),
            (
                ext_damage_scaler::talon_extension_create as CreateExtensionFn,
                ext_damage_scaler::talon_extension_destroy as DestroyExtensionFn,
            ),
        );
        Self { linked }
    }
}

impl LibraryOpener for LinkedOpener {
    fn open(&self, path: &Path) -> AppResult<Box<dyn ExtensionLibrary>> {
        match self.linked.get(path) {
            Some(&(create, destroy)) => Ok(Box::new(LinkedLibrary {
                path: path.to_path_buf(),
                create,
                destroy,
            })),
            None => NativeOpener.open(path),
        }
    }
}
