//! Scoped module relocation
//!
//! After `depmod`, each kernel's module directory lives in a stash outside
//! the root tree so that images only carry the modules of their own
//! kernel. [`ModuleRelocation`] moves one kernel's modules into
//! `<root>/modules/<version>` and moves them back out when dropped, on
//! every exit path.
//!
//! The guard holds `&mut PreparedRoot`, so two relocations into the same
//! tree cannot overlap.

use std::path::{Path, PathBuf};

use crate::error::FilesystemError;
use crate::infra::filesystem;

/// A prepared root tree
#[derive(Debug)]
pub struct PreparedRoot {
    path: PathBuf,
}

impl PreparedRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<root>/modules`
    pub fn modules_dir(&self) -> PathBuf {
        self.path.join("modules")
    }

    /// `<root>/modules/<version>`
    pub fn kernel_modules_dir(&self, version: &str) -> PathBuf {
        self.modules_dir().join(version)
    }

    /// `<root>/firmware`
    pub fn firmware_dir(&self) -> PathBuf {
        self.path.join("firmware")
    }
}

/// Holding area for module directories moved out of the root
#[derive(Debug, Clone)]
pub struct ModuleStash {
    dir: PathBuf,
}

impl ModuleStash {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stashed module directory of a kernel
    pub fn kernel_dir(&self, version: &str) -> PathBuf {
        self.dir.join(version)
    }

    /// Move `<root>/modules/<version>` into the stash
    pub fn stash(&self, root: &PreparedRoot, version: &str) -> Result<PathBuf, FilesystemError> {
        filesystem::create_dir_all(&self.dir)?;
        let dest = self.kernel_dir(version);
        filesystem::move_path(&root.kernel_modules_dir(version), &dest)?;
        tracing::debug!("Moved modules for {version} out of the tree");
        Ok(dest)
    }
}

/// Modules of one kernel, relocated into the root for the guard's lifetime
#[derive(Debug)]
pub struct ModuleRelocation<'a> {
    root: &'a mut PreparedRoot,
    stashed: PathBuf,
    in_tree: PathBuf,
    restored: bool,
}

impl<'a> ModuleRelocation<'a> {
    /// Move the stashed modules of `version` into `root`
    pub fn acquire(
        root: &'a mut PreparedRoot,
        stash: &ModuleStash,
        version: &str,
    ) -> Result<Self, FilesystemError> {
        let stashed = stash.kernel_dir(version);
        let in_tree = root.kernel_modules_dir(version);
        filesystem::create_dir_all(&root.modules_dir())?;
        tracing::debug!("moving modules inside initrd");
        filesystem::move_path(&stashed, &in_tree)?;

        Ok(Self {
            root,
            stashed,
            in_tree,
            restored: false,
        })
    }

    /// The root tree, with the modules in place
    pub fn root(&self) -> &PreparedRoot {
        self.root
    }

    /// Move the modules back to the stash, reporting failure
    pub fn release(mut self) -> Result<(), FilesystemError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), FilesystemError> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        tracing::debug!("moving modules outside initrd");
        filesystem::move_path(&self.in_tree, &self.stashed).map(|_| ())
    }
}

impl Drop for ModuleRelocation<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!("Failed to move modules back out of the tree: {e}");
        }
    }
}
