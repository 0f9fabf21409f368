//! Default configuration values

/// Size of the sparse ext4 image that holds the live root (2 GiB)
pub const ROOTFS_IMAGE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Filesystem label of the live root image
pub const ROOTFS_LABEL: &str = "Anaconda";

/// Name of the squashfs container dracut looks for at the initramfs root
pub const SQUASHFS_NAME: &str = "squashfs.img";

/// Path of the root filesystem image inside the squashfs container
pub const ROOTFS_IMAGE_PATH: &str = "LiveOS/rootfs.img";

/// Boot configuration file read by dracut
pub const CMDLINE_PATH: &str = "etc/cmdline";

/// Chunk size used when concatenating image layers
pub const CONCAT_CHUNK_SIZE: usize = 4096;

/// Maximum length of a module description in module-info
pub const DESCRIPTION_WIDTH: usize = 65;

/// Default compressor program for flat images
pub const DEFAULT_COMPRESSION: &str = "xz";

/// Default compressor arguments
pub const DEFAULT_COMPRESSION_ARGS: &str = "-9";

/// Compression type that selects the layered live image
pub const LIVE_COMPRESSION: &str = "squashfs";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "instree.toml";

/// Default base architecture
pub const DEFAULT_BASEARCH: &str = "x86_64";

/// Modules kept when none are configured
pub const DEFAULT_KEEP_MODULES: &[&str] = &["=scsi", "=net", "loop", "squashfs"];

/// Directory holding the dracut hook scripts
pub const DEFAULT_HOOKS_DIR: &str = "/usr/share/lorax/dracut_hooks";

/// Hook copied into the live initramfs by default: (script, dracut hook dir)
pub const DEFAULT_DRACUT_HOOKS: &[(&str, &str)] =
    &[("99anaconda-copy-ks.sh", "/lib/dracut/hooks/pre-pivot")];
