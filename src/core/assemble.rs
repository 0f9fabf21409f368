//! Bootable image assembly
//!
//! Two layouts are supported:
//!
//! - **Flat**: the whole tree is archived as newc cpio and streamed through
//!   a compressor into the output file.
//! - **Layered** (live boot): the tree is copied into a loop-mounted ext4
//!   image, which is packed as `LiveOS/rootfs.img` inside `squashfs.img`.
//!   That container and an `etc/cmdline` go into an uncompressed cpio which
//!   is appended byte for byte to a base initramfs generated beforehand.
//!
//! The output only appears at its final path once complete.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defaults::{
    CMDLINE_PATH, CONCAT_CHUNK_SIZE, ROOTFS_IMAGE_PATH, ROOTFS_IMAGE_SIZE, ROOTFS_LABEL,
    SQUASHFS_NAME,
};
use crate::core::kernel::KernelDescriptor;
use crate::core::tools::Toolbox;
use crate::error::{AssemblyError, FilesystemError, ToolError};
use crate::infra::filesystem::{self, PendingFile};

/// Image layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Single compressed cpio archive of the tree
    Flat,
    /// Base initramfs followed by a cpio carrying a squashfs root
    Layered,
}

/// Steps of a layered build, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NeedsBaseArtifact,
    FormattingImage,
    MountedCopying,
    Unmounting,
    Squashing,
    WrappingInCpio,
    Concatenating,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NeedsBaseArtifact => "checking base initramfs",
            Self::FormattingImage => "formatting rootfs image",
            Self::MountedCopying => "copying tree into rootfs image",
            Self::Unmounting => "unmounting rootfs image",
            Self::Squashing => "creating squashfs",
            Self::WrappingInCpio => "wrapping squashfs in cpio",
            Self::Concatenating => "concatenating images",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

impl Stage {
    fn tool(self) -> impl FnOnce(ToolError) -> AssemblyError {
        move |source| AssemblyError::Tool {
            stage: self.to_string(),
            source,
        }
    }

    fn fs(self) -> impl FnOnce(FilesystemError) -> AssemblyError {
        move |source| AssemblyError::Filesystem {
            stage: self.to_string(),
            source,
        }
    }
}

/// A finished image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledImage {
    pub path: PathBuf,
    pub size: u64,
    /// Bytes taken from the base initramfs (layered only)
    pub base_size: Option<u64>,
    /// Bytes of the appended squashfs cpio (layered only)
    pub overlay_size: Option<u64>,
}

/// Builds bootable images from a prepared tree
pub struct ImageAssembler<'a> {
    tools: Toolbox<'a>,
    image_size: u64,
    label: String,
    base_artifacts: HashMap<String, PathBuf>,
}

impl<'a> ImageAssembler<'a> {
    pub fn new(tools: Toolbox<'a>) -> Self {
        Self {
            tools,
            image_size: ROOTFS_IMAGE_SIZE,
            label: ROOTFS_LABEL.to_string(),
            base_artifacts: HashMap::new(),
        }
    }

    /// Capacity of the sparse rootfs image
    #[must_use]
    pub fn with_image_size(mut self, size: u64) -> Self {
        self.image_size = size;
        self
    }

    /// Filesystem label of the rootfs image
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Hand over the base initramfs of a kernel; it is deleted once consumed
    pub fn register_base_artifact(&mut self, version: &str, path: PathBuf) {
        self.base_artifacts.insert(version.to_string(), path);
    }

    pub fn has_base_artifact(&self, version: &str) -> bool {
        self.base_artifacts.contains_key(version)
    }

    /// Build the image for `kernel` from `tree` at `output`
    ///
    /// `scratch` is a working directory private to this kernel.
    pub fn assemble(
        &mut self,
        layout: Layout,
        tree: &Path,
        kernel: &KernelDescriptor,
        scratch: &Path,
        output: &Path,
    ) -> Result<AssembledImage, AssemblyError> {
        tracing::info!(
            "Assembling {:?} image for {} at {}",
            layout,
            kernel.version,
            output.display()
        );
        match layout {
            Layout::Flat => self.build_flat(tree, output),
            Layout::Layered => self.build_layered(tree, &kernel.version, scratch, output),
        }
    }

    /// Archive `tree` through the compressor into `output`
    pub fn build_flat(&self, tree: &Path, output: &Path) -> Result<AssembledImage, AssemblyError> {
        let fs_err = |source| AssemblyError::Filesystem {
            stage: "compressing tree".to_string(),
            source,
        };
        let tool_err = |source| AssemblyError::Tool {
            stage: "compressing tree".to_string(),
            source,
        };

        let mut pending = PendingFile::create(output).map_err(fs_err)?;
        let file = pending.take_file().ok_or_else(|| {
            fs_err(FilesystemError::WriteFile {
                path: pending.partial_path().to_path_buf(),
                error: "output handle already taken".to_string(),
            })
        })?;

        let mut sink = self.tools.compressor.compress_into(file).map_err(tool_err)?;
        let archived = self.tools.archiver.archive(tree, &mut sink);
        // Always reap the compressor, but report the archiver first
        let finished = sink.finish();
        archived.map_err(tool_err)?;
        finished.map_err(tool_err)?;

        let path = pending.commit().map_err(fs_err)?;
        let size = filesystem::file_size(&path).map_err(fs_err)?;
        tracing::debug!("{} is {size} bytes", path.display());
        Ok(AssembledImage {
            path,
            size,
            base_size: None,
            overlay_size: None,
        })
    }

    /// Build a live image: base initramfs + cpio(squashfs(ext4(tree)))
    pub fn build_layered(
        &mut self,
        tree: &Path,
        version: &str,
        scratch: &Path,
        output: &Path,
    ) -> Result<AssembledImage, AssemblyError> {
        let mut stage = Stage::NeedsBaseArtifact;
        let base = self
            .base_artifacts
            .get(version)
            .filter(|p| p.is_file())
            .cloned()
            .ok_or_else(|| AssemblyError::MissingBaseArtifact {
                version: version.to_string(),
            })?;

        stage = self.advance(stage, Stage::FormattingImage);
        filesystem::create_dir_all(scratch).map_err(stage.fs())?;
        let fs_image = scratch.join("installtree.img");
        let mountpoint = scratch.join("rootfs");
        filesystem::create_sparse_file(&fs_image, self.image_size).map_err(stage.fs())?;
        self.tools
            .formatter
            .format(&fs_image, &self.label)
            .map_err(stage.tool())?;
        filesystem::create_dir_all(&mountpoint).map_err(stage.fs())?;
        self.tools
            .mounter
            .mount_loop(&fs_image, &mountpoint)
            .map_err(stage.tool())?;

        stage = self.advance(stage, Stage::MountedCopying);
        let copied = self.tools.copier.copy_contents(tree, &mountpoint);

        stage = self.advance(stage, Stage::Unmounting);
        let unmounted = self.tools.mounter.unmount(&mountpoint);
        match (copied, unmounted) {
            (Err(copy), Err(umount)) => {
                tracing::error!("umount {} failed: {umount}", mountpoint.display());
                return Err(Stage::MountedCopying.tool()(copy));
            }
            (Err(copy), Ok(())) => return Err(Stage::MountedCopying.tool()(copy)),
            (Ok(()), Err(umount)) => {
                tracing::error!("umount {} failed: {umount}", mountpoint.display());
                return Err(stage.tool()(umount));
            }
            (Ok(()), Ok(())) => {}
        }
        filesystem::remove_dir(&mountpoint).map_err(stage.fs())?;

        stage = self.advance(stage, Stage::Squashing);
        tracing::info!("Creating {SQUASHFS_NAME} containing {ROOTFS_IMAGE_PATH}");
        let squash_tree = scratch.join("squashfs");
        let rootfs_in_tree = squash_tree.join(ROOTFS_IMAGE_PATH);
        if let Some(parent) = rootfs_in_tree.parent() {
            filesystem::create_dir_all(parent).map_err(stage.fs())?;
        }
        filesystem::move_path(&fs_image, &rootfs_in_tree).map_err(stage.fs())?;
        let squash_image = scratch.join(SQUASHFS_NAME);
        self.tools
            .packer
            .pack(&squash_tree, &squash_image)
            .map_err(stage.tool())?;
        filesystem::remove_dir_all(&squash_tree).map_err(stage.fs())?;

        stage = self.advance(stage, Stage::WrappingInCpio);
        let overlay_tree = scratch.join("initramfs");
        filesystem::write_file(
            &overlay_tree.join(CMDLINE_PATH),
            &format!("root=live:/{SQUASHFS_NAME}\n"),
        )
        .map_err(stage.fs())?;
        filesystem::move_path(&squash_image, &overlay_tree.join(SQUASHFS_NAME))
            .map_err(stage.fs())?;
        let overlay_cpio = scratch.join("squashfs.cpio");
        {
            let mut cpio = PendingFile::create(&overlay_cpio).map_err(stage.fs())?;
            let file = cpio.file_mut().ok_or_else(|| {
                stage.fs()(FilesystemError::WriteFile {
                    path: overlay_cpio.clone(),
                    error: "output handle already taken".to_string(),
                })
            })?;
            self.tools
                .archiver
                .archive(&overlay_tree, file)
                .map_err(stage.tool())?;
            cpio.commit().map_err(stage.fs())?;
        }
        filesystem::remove_dir_all(&overlay_tree).map_err(stage.fs())?;

        stage = self.advance(stage, Stage::Concatenating);
        let mut pending = PendingFile::create(output).map_err(stage.fs())?;
        let (base_size, overlay_size) = {
            let out = pending.file_mut().ok_or_else(|| {
                stage.fs()(FilesystemError::WriteFile {
                    path: output.to_path_buf(),
                    error: "output handle already taken".to_string(),
                })
            })?;
            let base_size =
                filesystem::append_file(&base, &mut *out, CONCAT_CHUNK_SIZE).map_err(stage.fs())?;
            tracing::debug!("initramfs.img size = {base_size}");
            let overlay_size = filesystem::append_file(&overlay_cpio, &mut *out, CONCAT_CHUNK_SIZE)
                .map_err(stage.fs())?;
            (base_size, overlay_size)
        };
        let path = pending.commit().map_err(stage.fs())?;
        filesystem::remove_file(&base).map_err(stage.fs())?;
        filesystem::remove_file(&overlay_cpio).map_err(stage.fs())?;
        self.base_artifacts.remove(version);

        self.advance(stage, Stage::Done);
        Ok(AssembledImage {
            path,
            size: base_size + overlay_size,
            base_size: Some(base_size),
            overlay_size: Some(overlay_size),
        })
    }

    fn advance(&self, from: Stage, to: Stage) -> Stage {
        tracing::debug!("{from} -> {to}");
        to
    }
}
