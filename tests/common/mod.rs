//! Common test utilities and helpers
//!
//! Builds small root trees laid out the way a prepared installer root is:
//! kernels under `boot/`, one module directory per kernel under
//! `modules/<version>` and a shared `firmware/` tree.

#![allow(dead_code)]

pub mod fakes;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Kernel version used by most fixtures
pub const VERSION: &str = "2.6.32-71.el6.x86_64";

/// Dependency listing for [`TestTree::with_standard_modules`]
///
/// `sd_mod` needs `scsi_mod`, `e1000e` needs `ptp` which needs `pps_core`,
/// `loop` and `squashfs` stand alone, `btrfs` and `floppy` are unwanted.
pub const STANDARD_DEP: &str = "\
kernel/drivers/scsi/sd_mod.ko: kernel/drivers/scsi/scsi_mod.ko
kernel/drivers/scsi/scsi_mod.ko:
kernel/drivers/net/e1000e/e1000e.ko: kernel/drivers/ptp/ptp.ko
kernel/drivers/ptp/ptp.ko: kernel/drivers/pps/pps_core.ko
kernel/drivers/pps/pps_core.ko:
kernel/drivers/block/loop.ko:
kernel/fs/squashfs/squashfs.ko:
kernel/fs/btrfs/btrfs.ko:
kernel/drivers/block/floppy.ko:
";

/// Temporary directory holding a root tree, a work directory and an output directory
pub struct TestTree {
    pub dir: TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        let tree = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        tree.create_dir("root");
        tree
    }

    /// A root with one kernel and the standard module set
    pub fn with_standard_modules() -> Self {
        let tree = Self::new();
        tree.add_kernel(&format!("vmlinuz-{VERSION}"));
        tree.write_module_dir(VERSION, STANDARD_DEP);
        tree.create_file(
            &format!("root/modules/{VERSION}/modules.block"),
            "sd_mod.ko\nscsi_mod.ko\nfloppy.ko\n",
        );
        tree.create_file(
            &format!("root/modules/{VERSION}/modules.networking"),
            "e1000e.ko\n",
        );
        tree
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub fn workdir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn moddir(&self, version: &str) -> PathBuf {
        self.root().join("modules").join(version)
    }

    /// Create a file (and its parents) relative to the temp directory
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    pub fn create_dir(&self, name: &str) {
        std::fs::create_dir_all(self.dir.path().join(name)).expect("Failed to create directory");
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Add an empty kernel image and a System.map under `root/boot`
    pub fn add_kernel(&self, file_name: &str) {
        self.create_file(&format!("root/boot/{file_name}"), "kernel");
        if let Some(version) = file_name.strip_prefix("vmlinuz-") {
            self.create_file(&format!("root/boot/System.map-{version}"), "map");
        }
    }

    /// Write `modules.dep` plus a module file for every entry in it
    pub fn write_module_dir(&self, version: &str, dep: &str) {
        let base = format!("root/modules/{version}");
        self.create_file(&format!("{base}/modules.dep"), dep);
        for line in dep.lines() {
            if let Some((module, _)) = line.split_once(':') {
                let name = Path::new(module)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(module);
                self.create_file(&format!("{base}/{module}"), name);
            }
        }
    }

    /// Add firmware files under `root/firmware`
    pub fn add_firmware(&self, names: &[&str]) {
        for name in names {
            self.create_file(&format!("root/firmware/{name}"), name);
        }
    }

    /// Write an `instree.toml` in the temp directory and return its path
    pub fn write_config(&self, content: &str) -> PathBuf {
        self.create_file("instree.toml", content);
        self.dir.path().join("instree.toml")
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the instree binary with a config directory private to `tree`
pub fn run_instree(tree: &TestTree, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_instree"))
        .env("INSTREE_CONFIG_DIR", tree.path().join("config"))
        .env_remove("INSTREE_CONFIG")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute instree")
}

/// Files below `dir`, relative to it, sorted
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().to_string())
        })
        .collect();
    files.sort();
    files
}
