//! Build configuration
//!
//! Settings are read from `instree.toml`. Every section is optional and
//! unknown keys are rejected:
//!
//! ```toml
//! [modules]
//! keep = ["=scsi", "=net", "loop"]
//!
//! [image]
//! compression = "xz"        # "squashfs" builds a live image
//! compression_args = "-9"
//! squashfs_args = "-comp xz"   # only used by live builds
//!
//! [kernel]
//! basearch = "x86_64"
//!
//! [dracut]
//! hooks_dir = "/usr/share/lorax/dracut_hooks"
//! hooks = [["99anaconda-copy-ks.sh", "/lib/dracut/hooks/pre-pivot"]]
//!
//! [tools]
//! mksquashfs = "/usr/sbin/mksquashfs"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::defaults::{
    DEFAULT_BASEARCH, DEFAULT_COMPRESSION, DEFAULT_COMPRESSION_ARGS, DEFAULT_DRACUT_HOOKS,
    DEFAULT_HOOKS_DIR, DEFAULT_KEEP_MODULES, LIVE_COMPRESSION, ROOTFS_IMAGE_SIZE, ROOTFS_LABEL,
};
use crate::core::assemble::Layout;
use crate::core::resolver::Seed;
use crate::error::ConfigError;
use crate::infra::dirs::InstreeDirs;

/// Longest label ext4 accepts
const MAX_LABEL_LEN: usize = 16;

/// Complete build configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub dracut: DracutConfig,

    #[serde(default)]
    pub tools: ToolPaths,
}

/// Module selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModulesConfig {
    /// Seed tokens: module names or `=group`
    pub keep: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            keep: DEFAULT_KEEP_MODULES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Output image settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    /// Compressor program, or `squashfs` for a live image
    pub compression: String,

    /// Extra arguments for the compressor
    pub compression_args: String,

    /// Extra arguments for mksquashfs in a live build
    pub squashfs_args: String,

    /// Capacity of the live rootfs image in bytes
    pub rootfs_size: u64,

    /// Label of the live rootfs image
    pub label: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            compression: DEFAULT_COMPRESSION.to_string(),
            compression_args: DEFAULT_COMPRESSION_ARGS.to_string(),
            squashfs_args: String::new(),
            rootfs_size: ROOTFS_IMAGE_SIZE,
            label: ROOTFS_LABEL.to_string(),
        }
    }
}

/// Kernel lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub basearch: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            basearch: DEFAULT_BASEARCH.to_string(),
        }
    }
}

/// A dracut hook: script name and the hook directory it is installed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DracutHook(pub String, pub String);

impl DracutHook {
    pub fn script(&self) -> &str {
        &self.0
    }

    pub fn target(&self) -> &str {
        &self.1
    }
}

/// Base initramfs generation for live images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DracutConfig {
    pub hooks_dir: PathBuf,
    pub hooks: Vec<DracutHook>,
}

impl Default for DracutConfig {
    fn default() -> Self {
        Self {
            hooks_dir: PathBuf::from(DEFAULT_HOOKS_DIR),
            hooks: DEFAULT_DRACUT_HOOKS
                .iter()
                .map(|(s, t)| DracutHook((*s).to_string(), (*t).to_string()))
                .collect(),
        }
    }
}

/// External program names or paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub mkfs_ext4: String,
    pub mount: String,
    pub umount: String,
    pub cp: String,
    pub cpio: String,
    pub mksquashfs: String,
    pub gzip: String,
    pub modinfo: String,
    pub depmod: String,
    pub chroot: String,
    /// dracut, as seen inside the chroot
    pub dracut: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mkfs_ext4: "mkfs.ext4".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            cp: "cp".to_string(),
            cpio: "cpio".to_string(),
            mksquashfs: "mksquashfs".to_string(),
            gzip: "gzip".to_string(),
            modinfo: "modinfo".to_string(),
            depmod: "depmod".to_string(),
            chroot: "chroot".to_string(),
            dracut: "/sbin/dracut".to_string(),
        }
    }
}

impl BuildConfig {
    /// Load from an explicit path, else the config directory, else defaults
    ///
    /// Returns the config and the file it came from, if any.
    pub fn load(
        explicit: Option<&Path>,
        dirs: &InstreeDirs,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::MissingInput {
                    path: path.to_path_buf(),
                });
            }
            return Ok((Self::load_from_path(path)?, Some(path.to_path_buf())));
        }

        let path = dirs.config_path();
        if path.is_file() {
            return Ok((Self::load_from_path(&path)?, Some(path)));
        }

        tracing::debug!("No config at {}, using defaults", path.display());
        Ok((Self::default(), None))
    }

    /// Parse and validate a config file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.compression.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "image.compression".to_string(),
                message: "must name a compressor".to_string(),
            });
        }
        if self.image.rootfs_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "image.rootfs_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.image.label.is_empty() || self.image.label.len() > MAX_LABEL_LEN {
            return Err(ConfigError::InvalidValue {
                field: "image.label".to_string(),
                message: format!("must be 1 to {MAX_LABEL_LEN} bytes"),
            });
        }
        if let Some(token) = self.modules.keep.iter().find(|t| t.trim().is_empty() || *t == "=") {
            return Err(ConfigError::InvalidValue {
                field: "modules.keep".to_string(),
                message: format!("invalid module token '{token}'"),
            });
        }
        Ok(())
    }

    /// Image layout selected by the compression type
    pub fn layout(&self) -> Layout {
        if self.image.compression == LIVE_COMPRESSION {
            Layout::Layered
        } else {
            Layout::Flat
        }
    }

    /// Parsed module seeds
    pub fn seeds(&self) -> Vec<Seed> {
        self.modules.keep.iter().map(|t| Seed::parse(t)).collect()
    }
}
