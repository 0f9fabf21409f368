//! Capability interfaces for external programs
//!
//! The core never spawns processes itself. Everything that needs a
//! formatter, mount, archiver, compressor or module metadata goes through
//! one of these traits; [`crate::infra::tools`] holds the real adapters and
//! tests supply fakes.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::kernel::KernelDescriptor;
use crate::error::{InstreeError, ToolError};

/// Creates a filesystem inside an image file
pub trait Formatter {
    /// Format `image` as a journaling filesystem labelled `label`
    fn format(&self, image: &Path, label: &str) -> Result<(), ToolError>;
}

/// Loop-mounts image files
pub trait Mounter {
    /// Mount `image` at `mountpoint` through a loop device
    fn mount_loop(&self, image: &Path, mountpoint: &Path) -> Result<(), ToolError>;

    /// Unmount `mountpoint`; a non-zero exit is an error
    fn unmount(&self, mountpoint: &Path) -> Result<(), ToolError>;
}

/// Copies a tree's contents preserving ownership, modes and links
pub trait TreeCopier {
    /// Copy every top-level entry of `source` into `dest`
    fn copy_contents(&self, source: &Path, dest: &Path) -> Result<(), ToolError>;
}

/// Serializes a directory tree into a newc cpio stream
pub trait Archiver {
    /// Archive `tree` (paths relative to it) into `out`
    fn archive(&self, tree: &Path, out: &mut dyn Write) -> Result<(), ToolError>;
}

/// The writing end of a running compressor
pub trait CompressedSink: Write {
    /// Close the input and wait for the compressor to finish
    fn finish(self: Box<Self>) -> Result<(), ToolError>;
}

/// Stream compressor (xz, gzip, ...)
pub trait Compressor {
    /// Start compressing into `output`; bytes written to the sink are compressed
    fn compress_into(&self, output: File) -> Result<Box<dyn CompressedSink>, ToolError>;
}

/// Packs a directory into a compressed read-only filesystem container
pub trait FilesystemPacker {
    /// Pack `tree` into the container file `output`
    fn pack(&self, tree: &Path, output: &Path) -> Result<(), ToolError>;
}

/// Per-module metadata queries
pub trait MetadataQuery {
    /// Firmware files (relative to the firmware root) the module declares
    fn firmware(&self, module: &Path) -> Result<Vec<String>, ToolError>;

    /// Free-text description of the module; empty when it has none
    fn description(&self, module: &Path) -> Result<String, ToolError>;
}

/// Rebuilds module dependency indexes
pub trait ModuleIndexer {
    /// Regenerate the module indexes of `version` below `root`
    fn depmod(&self, root: &Path, system_map: &Path, version: &str) -> Result<(), ToolError>;
}

/// Produces the base initramfs a live image is layered on
pub trait BaseImageGenerator {
    /// Generate the base initramfs for `kernel` from `root`, placing it under `workdir`
    fn generate(
        &self,
        root: &Path,
        kernel: &KernelDescriptor,
        workdir: &Path,
    ) -> Result<PathBuf, InstreeError>;
}

/// The set of tools an image build needs
#[derive(Clone, Copy)]
pub struct Toolbox<'a> {
    pub formatter: &'a dyn Formatter,
    pub mounter: &'a dyn Mounter,
    pub copier: &'a dyn TreeCopier,
    pub archiver: &'a dyn Archiver,
    pub compressor: &'a dyn Compressor,
    pub packer: &'a dyn FilesystemPacker,
}
