//! Adapters over the host's external programs
//!
//! Each adapter implements one capability trait from [`crate::core::tools`]
//! by running a program through [`crate::infra::process`]. Program names
//! come from the `[tools]` config section.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use walkdir::WalkDir;

use crate::core::config::{BuildConfig, DracutConfig};
use crate::core::kernel::KernelDescriptor;
use crate::core::pipeline::HostTools;
use crate::core::tools::{
    Archiver, BaseImageGenerator, CompressedSink, Compressor, FilesystemPacker, Formatter,
    MetadataQuery, ModuleIndexer, Mounter, Toolbox, TreeCopier,
};
use crate::core::tree::copy_dracut_hooks;
use crate::error::{FilesystemError, InstreeError, ToolError};
use crate::infra::filesystem;
use crate::infra::process;

/// Where dracut writes inside the chroot
const DRACUT_OUTPUT: &str = "tmp/initramfs.img";

/// dracut modules for a live initramfs
const DRACUT_MODULES: &str = "base dmsquash-live";

fn io_error(tool: &str) -> impl Fn(io::Error) -> ToolError + '_ {
    move |e| ToolError::Io {
        tool: tool.to_string(),
        error: e.to_string(),
    }
}

/// `mkfs.ext4`
#[derive(Debug, Clone)]
pub struct Mkfs {
    program: String,
}

impl Mkfs {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Formatter for Mkfs {
    fn format(&self, image: &Path, label: &str) -> Result<(), ToolError> {
        process::run(
            Command::new(&self.program)
                .args(["-q", "-L", label, "-F"])
                .arg(image),
        )?;
        Ok(())
    }
}

/// `mount -o loop` / `umount`
#[derive(Debug, Clone)]
pub struct LoopMounter {
    mount: String,
    umount: String,
}

impl LoopMounter {
    pub fn new(mount: impl Into<String>, umount: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            umount: umount.into(),
        }
    }
}

impl Mounter for LoopMounter {
    fn mount_loop(&self, image: &Path, mountpoint: &Path) -> Result<(), ToolError> {
        tracing::debug!("mounting {} at {}", image.display(), mountpoint.display());
        process::run(
            Command::new(&self.mount)
                .args(["-o", "loop"])
                .arg(image)
                .arg(mountpoint),
        )?;
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> Result<(), ToolError> {
        process::run(Command::new(&self.umount).arg(mountpoint))?;
        Ok(())
    }
}

/// `cp -a`
#[derive(Debug, Clone)]
pub struct CpCopier {
    program: String,
}

impl CpCopier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TreeCopier for CpCopier {
    fn copy_contents(&self, source: &Path, dest: &Path) -> Result<(), ToolError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(source)
            .map_err(io_error(&self.program))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort();

        tracing::info!("Copying {} into {}", source.display(), dest.display());
        process::run(Command::new(&self.program).arg("-a").args(&entries).arg(dest))?;
        Ok(())
    }
}

/// newc `cpio`, fed a NUL-separated file list
#[derive(Debug, Clone)]
pub struct CpioArchiver {
    program: String,
}

impl CpioArchiver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Archive member names: `.` then every entry as `./<relative path>`
fn archive_names(tree: &Path) -> Result<Vec<Vec<u8>>, FilesystemError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(tree).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| FilesystemError::Walk {
            path: tree.to_path_buf(),
            error: e.to_string(),
        })?;
        let rel = entry.path().strip_prefix(tree).unwrap_or(entry.path());
        let mut name = b".".to_vec();
        if !rel.as_os_str().is_empty() {
            name.push(b'/');
            name.extend_from_slice(rel.as_os_str().as_bytes());
        }
        names.push(name);
    }
    Ok(names)
}

impl Archiver for CpioArchiver {
    fn archive(&self, tree: &Path, out: &mut dyn Write) -> Result<(), ToolError> {
        let names = archive_names(tree).map_err(|e| ToolError::Io {
            tool: self.program.clone(),
            error: e.to_string(),
        })?;
        tracing::debug!("Archiving {} entries from {}", names.len(), tree.display());

        let mut child = process::spawn(
            Command::new(&self.program)
                .args(["--quiet", "--null", "-o", "-H", "newc"])
                .current_dir(tree)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
        )?;
        let broken = || ToolError::Io {
            tool: self.program.clone(),
            error: "child pipes unavailable".to_string(),
        };
        let mut stdin = child.stdin.take().ok_or_else(broken)?;
        let mut stdout = child.stdout.take().ok_or_else(broken)?;
        let mut stderr = child.stderr.take().ok_or_else(broken)?;

        let (fed, copied, diagnostics) = thread::scope(|s| {
            let feeder = s.spawn(move || -> io::Result<()> {
                for name in &names {
                    stdin.write_all(name)?;
                    stdin.write_all(b"\0")?;
                }
                Ok(())
            });
            let drain = s.spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            });

            let copied = io::copy(&mut stdout, out);
            drop(stdout);
            if copied.is_err() {
                // Nothing reads cpio's output any more; the feeder only unblocks once it exits
                if let Err(e) = child.kill() {
                    tracing::debug!("Could not stop {}: {e}", self.program);
                }
            }

            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("file list writer panicked")));
            let diagnostics = drain.join().unwrap_or_default();
            (fed, copied, diagnostics)
        });

        let status = child.wait().map_err(io_error(&self.program))?;
        let bytes = copied.map_err(io_error(&self.program))?;
        process::check_status(&self.program, status, &diagnostics)?;
        fed.map_err(io_error(&self.program))?;
        tracing::debug!("cpio wrote {bytes} bytes");
        Ok(())
    }
}

/// A stream compressor such as `xz` or `gzip`
#[derive(Debug, Clone)]
pub struct CommandCompressor {
    program: String,
    args: Vec<String>,
}

impl CommandCompressor {
    /// `program` with whitespace-separated `args`; xz also gets `--check=crc32`
    pub fn new(program: impl Into<String>, args: &str) -> Self {
        let program = program.into();
        let mut args: Vec<String> = args.split_whitespace().map(String::from).collect();
        let is_xz = Path::new(&program)
            .file_name()
            .is_some_and(|name| name == "xz");
        if is_xz {
            // The kernel's xz decoder only supports CRC32
            args.push("--check=crc32".to_string());
        }
        Self { program, args }
    }
}

impl Compressor for CommandCompressor {
    fn compress_into(&self, output: File) -> Result<Box<dyn CompressedSink>, ToolError> {
        let mut child = process::spawn(
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::from(output))
                .stderr(Stdio::piped()),
        )?;
        let stdin = child.stdin.take().ok_or_else(|| ToolError::Io {
            tool: self.program.clone(),
            error: "stdin unavailable".to_string(),
        })?;

        Ok(Box::new(ChildSink {
            tool: self.program.clone(),
            child,
            stdin: Some(stdin),
        }))
    }
}

/// Input pipe of a running compressor
struct ChildSink {
    tool: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ChildSink {
    fn pipe(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "compressor input closed"))
    }
}

impl Write for ChildSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipe()?.flush()
    }
}

impl CompressedSink for ChildSink {
    fn finish(mut self: Box<Self>) -> Result<(), ToolError> {
        drop(self.stdin.take());
        let Self { tool, child, .. } = *self;
        let output = child.wait_with_output().map_err(io_error(&tool))?;
        process::check_status(&tool, output.status, &output.stderr)
    }
}

/// `mksquashfs`
#[derive(Debug, Clone)]
pub struct Mksquashfs {
    program: String,
    args: Vec<String>,
}

impl Mksquashfs {
    pub fn new(program: impl Into<String>, args: &str) -> Self {
        Self {
            program: program.into(),
            args: args.split_whitespace().map(String::from).collect(),
        }
    }
}

impl FilesystemPacker for Mksquashfs {
    fn pack(&self, tree: &Path, output: &Path) -> Result<(), ToolError> {
        process::run(
            Command::new(&self.program)
                .arg(tree)
                .arg(output)
                .args(&self.args),
        )?;
        Ok(())
    }
}

/// `modinfo -F <field>`
#[derive(Debug, Clone)]
pub struct Modinfo {
    program: String,
}

impl Modinfo {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn field(&self, field: &str, module: &Path) -> Result<String, ToolError> {
        process::run_stdout(Command::new(&self.program).args(["-F", field]).arg(module))
    }
}

impl MetadataQuery for Modinfo {
    fn firmware(&self, module: &Path) -> Result<Vec<String>, ToolError> {
        Ok(self
            .field("firmware", module)?
            .split_whitespace()
            .map(String::from)
            .collect())
    }

    fn description(&self, module: &Path) -> Result<String, ToolError> {
        self.field("description", module)
    }
}

/// `depmod -a`
#[derive(Debug, Clone)]
pub struct Depmod {
    program: String,
}

impl Depmod {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ModuleIndexer for Depmod {
    fn depmod(&self, root: &Path, system_map: &Path, version: &str) -> Result<(), ToolError> {
        process::run(
            Command::new(&self.program)
                .arg("-a")
                .arg("-F")
                .arg(system_map)
                .arg("-b")
                .arg(root)
                .arg(version),
        )?;
        Ok(())
    }
}

/// dracut run inside the tree through `chroot`
#[derive(Debug, Clone)]
pub struct DracutGenerator {
    chroot: String,
    dracut: String,
    hooks: DracutConfig,
}

impl DracutGenerator {
    pub fn new(chroot: impl Into<String>, dracut: impl Into<String>, hooks: DracutConfig) -> Self {
        Self {
            chroot: chroot.into(),
            dracut: dracut.into(),
            hooks,
        }
    }
}

impl BaseImageGenerator for DracutGenerator {
    fn generate(
        &self,
        root: &Path,
        kernel: &KernelDescriptor,
        workdir: &Path,
    ) -> Result<PathBuf, InstreeError> {
        let include = copy_dracut_hooks(&self.hooks.hooks_dir, &self.hooks.hooks, root)?;

        tracing::debug!("chrooting into {} to create initramfs.img", root.display());
        process::run(
            Command::new(&self.chroot)
                .arg(root)
                .arg(&self.dracut)
                .args(["--noprefix", "--nomdadmconf", "--nolvmconf", "--xz"])
                .args(["--modules", DRACUT_MODULES])
                .args(&include)
                .arg(format!("/{DRACUT_OUTPUT}"))
                .arg(&kernel.version),
        )?;

        let dest_dir = workdir.join(format!("dracut-{}", kernel.version));
        filesystem::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join("initramfs.img");
        filesystem::move_path(&root.join(DRACUT_OUTPUT), &dest)?;
        Ok(dest)
    }
}

/// Real adapters for every capability, configured from [`BuildConfig`]
#[derive(Debug, Clone)]
pub struct SystemTools {
    mkfs: Mkfs,
    mounter: LoopMounter,
    copier: CpCopier,
    archiver: CpioArchiver,
    image_compressor: CommandCompressor,
    module_compressor: CommandCompressor,
    packer: Mksquashfs,
    modinfo: Modinfo,
    depmod: Depmod,
    dracut: DracutGenerator,
}

impl SystemTools {
    pub fn from_config(config: &BuildConfig) -> Self {
        let tools = &config.tools;
        let image = &config.image;
        Self {
            mkfs: Mkfs::new(&tools.mkfs_ext4),
            mounter: LoopMounter::new(&tools.mount, &tools.umount),
            copier: CpCopier::new(&tools.cp),
            archiver: CpioArchiver::new(&tools.cpio),
            image_compressor: CommandCompressor::new(&image.compression, &image.compression_args),
            module_compressor: CommandCompressor::new(&tools.gzip, "-9"),
            packer: Mksquashfs::new(&tools.mksquashfs, &image.squashfs_args),
            modinfo: Modinfo::new(&tools.modinfo),
            depmod: Depmod::new(&tools.depmod),
            dracut: DracutGenerator::new(&tools.chroot, &tools.dracut, config.dracut.clone()),
        }
    }

    /// Borrow every adapter as a capability
    pub fn host_tools(&self) -> HostTools<'_> {
        HostTools {
            toolbox: Toolbox {
                formatter: &self.mkfs,
                mounter: &self.mounter,
                copier: &self.copier,
                archiver: &self.archiver,
                compressor: &self.image_compressor,
                packer: &self.packer,
            },
            metadata: &self.modinfo,
            indexer: &self.depmod,
            module_compressor: &self.module_compressor,
            base_generator: &self.dracut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Executable that ignores cpio's flags and runs `body`
    fn stand_in_cpio(dir: &Path, body: &str) -> String {
        let path = dir.join("cpio");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    /// A tree whose file list is larger than a pipe buffer
    fn large_tree(dir: &Path) -> PathBuf {
        let tree = dir.join("tree");
        for i in 0..5000 {
            let sub = tree.join(format!("dir-{:02}", i % 50));
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join(format!("file-{i:05}")), b"").unwrap();
        }
        tree
    }

    struct RejectingWriter;

    impl Write for RejectingWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `archive` on a helper thread, failing the test if it does not return
    fn archive_with_timeout<W: Write + Send + 'static>(
        archiver: CpioArchiver,
        tree: PathBuf,
        mut out: W,
    ) -> (Result<(), ToolError>, W) {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = archiver.archive(&tree, &mut out);
            let _ = tx.send((result, out));
        });
        rx.recv_timeout(Duration::from_secs(30))
            .expect("archive did not return")
    }

    #[test]
    fn test_xz_gets_crc32_check() {
        let xz = CommandCompressor::new("xz", "-9");
        assert_eq!(xz.args, ["-9", "--check=crc32"]);
        let gzip = CommandCompressor::new("/usr/bin/gzip", "-9 -n");
        assert_eq!(gzip.args, ["-9", "-n"]);
    }

    #[test]
    fn test_archive_names_are_relative() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/cmdline"), b"x").unwrap();

        let names: Vec<String> = archive_names(dir.path())
            .unwrap()
            .into_iter()
            .map(|n| String::from_utf8(n).unwrap())
            .collect();
        assert_eq!(names, [".", "./etc", "./etc/cmdline"]);
    }

    #[test]
    fn test_archiver_fails_when_output_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let archiver = CpioArchiver::new(stand_in_cpio(dir.path(), "exec cat"));
        let tree = large_tree(dir.path());

        let (result, _) = archive_with_timeout(archiver, tree, RejectingWriter);
        let err = result.unwrap_err();

        assert!(matches!(err, ToolError::Io { .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_archiver_survives_noisy_stderr() {
        let dir = TempDir::new().unwrap();
        let archiver = CpioArchiver::new(stand_in_cpio(
            dir.path(),
            "yes 'cpio: warning' | head -c 200000 >&2\nexec cat",
        ));
        let tree = large_tree(dir.path());
        let expected: usize = archive_names(&tree).unwrap().iter().map(|n| n.len() + 1).sum();

        let (result, written) = archive_with_timeout(archiver, tree, Vec::new());

        result.unwrap();
        assert_eq!(written.len(), expected);
    }

    #[test]
    fn test_command_compressor_streams_through_program() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let cat = CommandCompressor::new("cat", "");

        let mut sink = cat.compress_into(File::create(&out).unwrap()).unwrap();
        sink.write_all(b"hello").unwrap();
        sink.finish().unwrap();

        let mut content = String::new();
        File::open(&out).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_failing_compressor_reports_status() {
        let dir = TempDir::new().unwrap();
        let fail = CommandCompressor::new("false", "");
        let sink = fail
            .compress_into(File::create(dir.path().join("out")).unwrap())
            .unwrap();
        assert!(matches!(sink.finish(), Err(ToolError::Failed { .. })));
    }
}
