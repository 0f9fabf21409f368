//! Module and firmware pruning
//!
//! Deletes every module file outside the resolved closure, collects the
//! firmware the surviving modules declare, then deletes every firmware
//! file nobody asked for.
//!
//! The firmware pass must run after the module pass has finished: a blob
//! is only known to be unneeded once every retained module was queried.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::moddep::module_file_stem;
use crate::core::tools::MetadataQuery;
use crate::error::{FilesystemError, InstreeError};

/// Firmware kept regardless of module metadata
///
/// These devices load blobs their modules do not declare.
pub const MANDATORY_FIRMWARE: &[&str] = &[
    "atmel_at76c504c-wpa.bin",
    "iwlwifi-3945-1.ucode",
    "iwlwifi-3945.ucode",
    "zd1211/zd1211_uph",
    "zd1211/zd1211_uphm",
    "zd1211/zd1211b_uph",
    "zd1211/zd1211b_uphm",
];

/// Outcome of a pruning run
#[derive(Debug, Clone, Default)]
pub struct FirmwareSelection {
    /// Firmware paths (relative to the firmware root) that were kept
    pub firmware: BTreeSet<String>,
    /// Base names of module files that survived
    pub retained_modules: BTreeSet<String>,
    /// Module files that were deleted
    pub removed_modules: Vec<PathBuf>,
    /// Firmware files that were deleted
    pub removed_firmware: Vec<PathBuf>,
}

/// Prunes one kernel's module directory and the shared firmware tree
pub struct FirmwareSelector<'a> {
    query: &'a dyn MetadataQuery,
    mandatory: BTreeSet<String>,
}

impl<'a> FirmwareSelector<'a> {
    /// Create a selector seeded with [`MANDATORY_FIRMWARE`]
    pub fn new(query: &'a dyn MetadataQuery) -> Self {
        Self {
            query,
            mandatory: MANDATORY_FIRMWARE.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Keep additional firmware unconditionally
    #[must_use]
    pub fn with_extra_firmware<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory.extend(extra.into_iter().map(Into::into));
        self
    }

    /// Prune `moddir` to `required` and `fwdir` to the firmware they need
    pub fn select(
        &self,
        required: &BTreeSet<String>,
        moddir: &Path,
        fwdir: &Path,
    ) -> Result<FirmwareSelection, InstreeError> {
        let mut selection = FirmwareSelection {
            firmware: self.mandatory.clone(),
            ..Default::default()
        };

        for path in files_below(moddir)? {
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(module_file_stem)
                .map(String::from)
            else {
                continue;
            };

            if required.contains(&name) {
                for blob in self.query.firmware(&path)? {
                    selection.firmware.insert(blob);
                }
                selection.retained_modules.insert(name);
            } else {
                remove(&path)?;
                tracing::debug!("removed module {}", path.display());
                selection.removed_modules.push(path);
            }
        }

        if fwdir.exists() {
            for path in files_below(fwdir)? {
                let keep = path
                    .strip_prefix(fwdir)
                    .ok()
                    .and_then(Path::to_str)
                    .is_some_and(|rel| selection.firmware.contains(rel));
                if !keep {
                    remove(&path)?;
                    tracing::debug!("removed firmware {}", path.display());
                    selection.removed_firmware.push(path);
                }
            }
        }

        tracing::info!(
            "Kept {} modules and {} firmware entries; removed {} modules, {} firmware files",
            selection.retained_modules.len(),
            selection.firmware.len(),
            selection.removed_modules.len(),
            selection.removed_firmware.len()
        );
        Ok(selection)
    }
}

/// Every non-directory entry below `dir`, symlinks included, in a stable order
fn files_below(dir: &Path) -> Result<Vec<PathBuf>, FilesystemError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| FilesystemError::Walk {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn remove(path: &Path) -> Result<(), FilesystemError> {
    fs::remove_file(path).map_err(|e| FilesystemError::RemoveFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}
