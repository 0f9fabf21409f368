//! Kernel discovery
//!
//! Scans the boot directory of a prepared root for `vmlinuz-<version>`
//! images and classifies each one as a normal, PAE or Xen kernel.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ConfigError, FilesystemError};
use crate::infra::filesystem;

/// Kernel flavour, ordered the way kernels are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// Plain kernel
    Normal,
    /// 32-bit kernel with physical address extension
    Pae,
    /// Xen paravirtualized kernel
    Xen,
}

impl KernelType {
    /// File name of the bootable image built for this kernel flavour
    pub fn image_name(self) -> &'static str {
        match self {
            Self::Normal => "initrd.img",
            Self::Pae => "initrd-PAE.img",
            Self::Xen => "initrd-xen.img",
        }
    }
}

impl std::fmt::Display for KernelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Pae => write!(f, "PAE"),
            Self::Xen => write!(f, "xen"),
        }
    }
}

/// A kernel image found in the boot directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelDescriptor {
    /// File name, e.g. `vmlinuz-2.6.32-71.el6.x86_64`
    pub file_name: String,
    /// Full path of the kernel image
    pub file_path: PathBuf,
    /// Version string used for `modules/<version>`
    pub version: String,
    /// Kernel flavour
    pub kernel_type: KernelType,
}

fn kernel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^vmlinuz-(?P<ver>[-._0-9a-z]+?(?P<pae>(PAE)?)(?P<xen>(xen)?))$")
            .expect("kernel file pattern is valid")
    })
}

impl KernelDescriptor {
    /// Parse a boot directory entry, returning `None` for anything that is not a kernel
    pub fn from_file_name(dir: &Path, file_name: &str) -> Option<Self> {
        let caps = kernel_pattern().captures(file_name)?;

        let kernel_type = if caps.name("pae").is_some_and(|m| !m.as_str().is_empty()) {
            KernelType::Pae
        } else if caps.name("xen").is_some_and(|m| !m.as_str().is_empty()) {
            KernelType::Xen
        } else {
            KernelType::Normal
        };

        Some(Self {
            file_name: file_name.to_string(),
            file_path: dir.join(file_name),
            version: caps["ver"].to_string(),
            kernel_type,
        })
    }
}

/// Boot directory for a base architecture, relative to the root
pub fn boot_dir(basearch: &str) -> &'static str {
    if basearch == "ia64" {
        "boot/efi/EFI/redhat"
    } else {
        "boot"
    }
}

/// Discover kernels under `<root>/<boot_dir>`
///
/// Entries are visited in file-name order so that kernels of the same type
/// keep a stable relative order; the result is sorted by [`KernelType`].
pub fn discover(root: &Path, basearch: &str) -> Result<Vec<KernelDescriptor>, FilesystemError> {
    let dir = root.join(boot_dir(basearch));
    let mut names: Vec<String> = filesystem::read_dir_entries(&dir)?
        .into_iter()
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    names.sort();

    let mut kernels: Vec<KernelDescriptor> = names
        .iter()
        .filter_map(|name| KernelDescriptor::from_file_name(&dir, name))
        .collect();
    kernels.sort_by_key(|k| k.kernel_type);

    tracing::debug!("Found {} kernels in {}", kernels.len(), dir.display());
    Ok(kernels)
}

/// Fail if two kernels would be written to the same image
pub fn check_image_names(kernels: &[KernelDescriptor]) -> Result<(), ConfigError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for kernel in kernels {
        let image = kernel.kernel_type.image_name();
        if let Some(first) = seen.insert(image, &kernel.version) {
            return Err(ConfigError::ImageNameClash {
                image: image.to_string(),
                first: first.to_string(),
                second: kernel.version.clone(),
            });
        }
    }
    Ok(())
}
