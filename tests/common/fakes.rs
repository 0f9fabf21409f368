//! In-process stand-ins for the external tools
//!
//! The archiver writes a readable listing instead of cpio, the compressor
//! passes bytes through and the mounter treats the mountpoint as a plain
//! directory, emptying it on unmount.

use instree::core::kernel::KernelDescriptor;
use instree::core::pipeline::HostTools;
use instree::core::tools::{
    Archiver, BaseImageGenerator, CompressedSink, Compressor, FilesystemPacker, Formatter,
    MetadataQuery, ModuleIndexer, Mounter, Toolbox, TreeCopier,
};
use instree::error::{InstreeError, ToolError};
use std::cell::{Cell, RefCell};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn failed(tool: &str) -> ToolError {
    ToolError::Failed {
        tool: tool.to_string(),
        status: Some(1),
        stderr: format!("{tool} failed"),
    }
}

fn io_err(tool: &str) -> impl Fn(io::Error) -> ToolError + '_ {
    move |e| ToolError::Io {
        tool: tool.to_string(),
        error: e.to_string(),
    }
}

/// Formats nothing
#[derive(Default)]
pub struct FakeFormatter {
    pub labels: RefCell<Vec<String>>,
}

impl Formatter for FakeFormatter {
    fn format(&self, image: &Path, label: &str) -> Result<(), ToolError> {
        assert!(image.is_file(), "image must exist before formatting");
        self.labels.borrow_mut().push(label.to_string());
        Ok(())
    }
}

/// Mountpoint is a plain directory; unmount empties it
#[derive(Default)]
pub struct FakeMounter {
    pub fail_unmount: bool,
    pub mounted: Cell<bool>,
    pub unmounts: Cell<usize>,
}

impl FakeMounter {
    pub fn failing_unmount() -> Self {
        Self {
            fail_unmount: true,
            ..Default::default()
        }
    }
}

impl Mounter for FakeMounter {
    fn mount_loop(&self, _image: &Path, mountpoint: &Path) -> Result<(), ToolError> {
        assert!(mountpoint.is_dir(), "mountpoint must exist before mounting");
        self.mounted.set(true);
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> Result<(), ToolError> {
        self.unmounts.set(self.unmounts.get() + 1);
        if self.fail_unmount {
            return Err(failed("umount"));
        }
        fs::remove_dir_all(mountpoint).map_err(io_err("umount"))?;
        fs::create_dir(mountpoint).map_err(io_err("umount"))?;
        self.mounted.set(false);
        Ok(())
    }
}

/// Recursive copy with std
#[derive(Default)]
pub struct FakeCopier {
    pub fail: bool,
}

impl TreeCopier for FakeCopier {
    fn copy_contents(&self, source: &Path, dest: &Path) -> Result<(), ToolError> {
        if self.fail {
            return Err(failed("cp"));
        }
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| io_err("cp")(e.into()))?;
            let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(io_err("cp"))?;
            } else {
                fs::copy(entry.path(), &target).map_err(io_err("cp"))?;
            }
        }
        Ok(())
    }
}

/// Writes `<relative path>\n<contents>\n` for every file, sorted
#[derive(Default)]
pub struct FakeArchiver {
    pub trees: RefCell<Vec<PathBuf>>,
}

impl FakeArchiver {
    pub fn listing(tree: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in WalkDir::new(tree).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(tree).unwrap_or(entry.path());
            out.extend_from_slice(rel.to_string_lossy().as_bytes());
            out.push(b'\n');
            out.extend_from_slice(&fs::read(entry.path()).unwrap_or_default());
            out.push(b'\n');
        }
        out
    }
}

impl Archiver for FakeArchiver {
    fn archive(&self, tree: &Path, out: &mut dyn Write) -> Result<(), ToolError> {
        self.trees.borrow_mut().push(tree.to_path_buf());
        out.write_all(&Self::listing(tree)).map_err(io_err("cpio"))
    }
}

/// Passes bytes through unchanged
#[derive(Default)]
pub struct FakeCompressor {
    pub fail: bool,
}

pub struct PassthroughSink {
    file: File,
    fail: bool,
}

impl Write for PassthroughSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl CompressedSink for PassthroughSink {
    fn finish(self: Box<Self>) -> Result<(), ToolError> {
        if self.fail {
            return Err(failed("xz"));
        }
        Ok(())
    }
}

impl Compressor for FakeCompressor {
    fn compress_into(&self, output: File) -> Result<Box<dyn CompressedSink>, ToolError> {
        Ok(Box::new(PassthroughSink {
            file: output,
            fail: self.fail,
        }))
    }
}

/// Writes a marker followed by the size of every packed file
#[derive(Default)]
pub struct FakePacker;

impl FilesystemPacker for FakePacker {
    fn pack(&self, tree: &Path, output: &Path) -> Result<(), ToolError> {
        let mut content = b"hsqs".to_vec();
        for entry in WalkDir::new(tree).sort_by_file_name() {
            let entry = entry.map_err(|e| io_err("mksquashfs")(e.into()))?;
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(tree).unwrap_or(entry.path());
                content.extend_from_slice(format!("\n{}", rel.display()).as_bytes());
            }
        }
        fs::write(output, content).map_err(io_err("mksquashfs"))
    }
}

/// Records depmod calls
#[derive(Default)]
pub struct FakeIndexer {
    pub calls: RefCell<Vec<String>>,
}

impl ModuleIndexer for FakeIndexer {
    fn depmod(&self, _root: &Path, _system_map: &Path, version: &str) -> Result<(), ToolError> {
        self.calls.borrow_mut().push(version.to_string());
        Ok(())
    }
}

/// No firmware, no descriptions
#[derive(Default)]
pub struct NoMetadata;

impl MetadataQuery for NoMetadata {
    fn firmware(&self, _module: &Path) -> Result<Vec<String>, ToolError> {
        Ok(Vec::new())
    }

    fn description(&self, _module: &Path) -> Result<String, ToolError> {
        Ok(String::new())
    }
}

/// Writes a fixed-size base initramfs into the work directory
pub struct FakeBaseGenerator {
    pub size: usize,
    pub seen_modules: RefCell<Vec<bool>>,
}

impl Default for FakeBaseGenerator {
    fn default() -> Self {
        Self {
            size: 10_000,
            seen_modules: RefCell::new(Vec::new()),
        }
    }
}

impl BaseImageGenerator for FakeBaseGenerator {
    fn generate(
        &self,
        root: &Path,
        kernel: &KernelDescriptor,
        workdir: &Path,
    ) -> Result<PathBuf, InstreeError> {
        self.seen_modules
            .borrow_mut()
            .push(root.join("modules").join(&kernel.version).is_dir());
        let dir = workdir.join(format!("dracut-{}", kernel.version));
        fs::create_dir_all(&dir).map_err(|e| io_err("dracut")(e))?;
        let path = dir.join("initramfs.img");
        fs::write(&path, vec![0xAB; self.size]).map_err(|e| io_err("dracut")(e))?;
        Ok(path)
    }
}

/// One of every fake, with knobs for the failure cases
#[derive(Default)]
pub struct FakeTools {
    pub formatter: FakeFormatter,
    pub mounter: FakeMounter,
    pub copier: FakeCopier,
    pub archiver: FakeArchiver,
    pub compressor: FakeCompressor,
    pub packer: FakePacker,
    pub indexer: FakeIndexer,
    pub metadata: NoMetadata,
    pub module_compressor: FakeCompressor,
    pub base: FakeBaseGenerator,
}

impl FakeTools {
    pub fn toolbox(&self) -> Toolbox<'_> {
        Toolbox {
            formatter: &self.formatter,
            mounter: &self.mounter,
            copier: &self.copier,
            archiver: &self.archiver,
            compressor: &self.compressor,
            packer: &self.packer,
        }
    }

    pub fn host_tools(&self) -> HostTools<'_> {
        HostTools {
            toolbox: self.toolbox(),
            metadata: &self.metadata,
            indexer: &self.indexer,
            module_compressor: &self.module_compressor,
            base_generator: &self.base,
        }
    }
}
