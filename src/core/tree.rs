//! Root tree preparation
//!
//! Steps that run on the prepared root before images are assembled:
//! relocating `lib/modules` and `lib/firmware`, configuring depmod,
//! compressing modules, rebuilding module indexes, and staging dracut hooks.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::config::DracutHook;
use crate::core::relocate::{ModuleStash, PreparedRoot};
use crate::core::tools::{Compressor, ModuleIndexer};
use crate::error::{FilesystemError, InstreeError, ToolError};
use crate::infra::filesystem::{self, PendingFile};

/// depmod search order for driver update disks
const DEPMOD_CONF: &str = "search updates built-in\n";

/// Links dropped from each module directory
const MODULE_DIR_LINKS: &[&str] = &["build", "source"];

/// Move `lib/modules` and `lib/firmware` to the top of the tree
///
/// Relative links are left behind in `lib/`. Returns `false` when the tree
/// was already in that shape.
pub fn move_modules(root: &PreparedRoot) -> Result<bool, FilesystemError> {
    let lib = root.path().join("lib");
    let mut moved = false;

    for (name, dest) in [("modules", root.modules_dir()), ("firmware", root.firmware_dir())] {
        let src = lib.join(name);
        let is_link = fs::symlink_metadata(&src).is_ok_and(|m| m.file_type().is_symlink());
        if is_link || !src.is_dir() {
            tracing::debug!("{} already moved or absent", src.display());
            continue;
        }
        filesystem::move_path(&src, &dest)?;
        filesystem::symlink(&Path::new("..").join(name), &src)?;
        tracing::debug!("Moved lib/{name} to {}", dest.display());
        moved = true;
    }

    Ok(moved)
}

/// Write `etc/depmod.d/dd.conf`
pub fn create_depmod_conf(root: &PreparedRoot) -> Result<PathBuf, FilesystemError> {
    let path = root.path().join("etc/depmod.d/dd.conf");
    filesystem::write_file(&path, DEPMOD_CONF)?;
    Ok(path)
}

/// Compress every uncompressed `.ko` below `moddir` to `.ko.gz`
///
/// Returns the number of modules compressed.
pub fn compress_modules(moddir: &Path, compressor: &dyn Compressor) -> Result<usize, InstreeError> {
    let mut modules = Vec::new();
    for entry in WalkDir::new(moddir).sort_by_file_name() {
        let entry = entry.map_err(|e| FilesystemError::Walk {
            path: moddir.to_path_buf(),
            error: e.to_string(),
        })?;
        if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(".ko") {
            modules.push(entry.into_path());
        }
    }

    for path in &modules {
        let mut target = path.clone().into_os_string();
        target.push(".gz");
        let target = PathBuf::from(target);

        let mut pending = PendingFile::create(&target)?;
        let Some(out) = pending.take_file() else {
            continue;
        };
        let mut input = File::open(path).map_err(|e| FilesystemError::ReadFile {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let mut sink = compressor.compress_into(out)?;
        let copied = io::copy(&mut input, &mut sink).map_err(|e| ToolError::Io {
            tool: "compressor".to_string(),
            error: e.to_string(),
        });
        let finished = sink.finish();
        copied?;
        finished?;

        pending.commit()?;
        filesystem::remove_file(path)?;
    }

    tracing::info!("Compressed {} modules in {}", modules.len(), moddir.display());
    Ok(modules.len())
}

/// Rebuild module indexes for `version`, tidy its directory and stash it
///
/// Returns the stashed module directory.
pub fn run_depmod(
    root: &PreparedRoot,
    version: &str,
    indexer: &dyn ModuleIndexer,
    stash: &ModuleStash,
) -> Result<PathBuf, InstreeError> {
    let system_map = root.path().join("boot").join(format!("System.map-{version}"));
    indexer.depmod(root.path(), &system_map, version)?;

    let moddir = root.kernel_modules_dir(version);
    for entry in filesystem::read_dir_entries(&moddir)? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let is_link = MODULE_DIR_LINKS.contains(&name.as_str())
            && fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink());
        if (name.ends_with("map") && path.is_file()) || is_link {
            filesystem::remove_file(&path)?;
            tracing::debug!("removed {}", path.display());
        }
    }

    Ok(stash.stash(root, version)?)
}

/// Copy hook scripts into `<root>/tmp` and build dracut's `--include` arguments
///
/// Missing scripts are logged and skipped.
pub fn copy_dracut_hooks(
    hooks_dir: &Path,
    hooks: &[DracutHook],
    root: &Path,
) -> Result<Vec<String>, FilesystemError> {
    let tmp = root.join("tmp");
    let mut args = Vec::new();

    for hook in hooks {
        let src = hooks_dir.join(hook.script());
        if !src.is_file() {
            tracing::error!("Missing dracut hook script {}", src.display());
            continue;
        }
        filesystem::create_dir_all(&tmp)?;
        filesystem::copy_file(&src, &tmp.join(hook.script()))?;
        args.push("--include".to_string());
        args.push(format!("/tmp/{}", hook.script()));
        args.push(hook.target().to_string());
    }

    Ok(args)
}
