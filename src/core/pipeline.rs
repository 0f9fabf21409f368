//! Build orchestration
//!
//! A run has two phases. Preparation prunes each kernel's modules and the
//! shared firmware tree, writes module-info, compresses the modules,
//! rebuilds their indexes and stashes them in the work directory.
//! Assembly then relocates one kernel's modules at a time back into the
//! tree and builds that kernel's image.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::assemble::{AssembledImage, ImageAssembler, Layout};
use crate::core::config::BuildConfig;
use crate::core::firmware::{FirmwareSelection, FirmwareSelector};
use crate::core::kernel::{self, KernelDescriptor};
use crate::core::moddep::{self, ModuleGraph};
use crate::core::module_info::ModuleListWriter;
use crate::core::relocate::{ModuleRelocation, ModuleStash, PreparedRoot};
use crate::core::report::{self, BuildReport, KernelReport};
use crate::core::resolver::ClosureResolver;
use crate::core::tools::{BaseImageGenerator, Compressor, MetadataQuery, ModuleIndexer, Toolbox};
use crate::core::tree;
use crate::error::{ConfigError, Result};

/// Every external capability a run uses
pub struct HostTools<'a> {
    /// Tools for image assembly
    pub toolbox: Toolbox<'a>,
    /// Module firmware and description queries
    pub metadata: &'a dyn MetadataQuery,
    /// depmod
    pub indexer: &'a dyn ModuleIndexer,
    /// Compressor for individual module files
    pub module_compressor: &'a dyn Compressor,
    /// Base initramfs generator for live images
    pub base_generator: &'a dyn BaseImageGenerator,
}

/// Paths of one run
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Prepared root tree
    pub root: PathBuf,
    /// Scratch area; module stash and per-kernel working directories
    pub workdir: PathBuf,
    /// Where the images are written
    pub output_dir: PathBuf,
    /// Relocate `lib/modules` and write the depmod config first
    pub prepare: bool,
}

/// Per-kernel result of the preparation phase
#[derive(Debug, Clone)]
pub struct PreparedKernel {
    pub kernel: KernelDescriptor,
    pub selection: FirmwareSelection,
    pub module_info_records: usize,
}

/// Runs a build over every kernel of a prepared root
pub struct Builder<'a> {
    config: &'a BuildConfig,
    tools: HostTools<'a>,
}

impl<'a> Builder<'a> {
    pub fn new(config: &'a BuildConfig, tools: HostTools<'a>) -> Self {
        Self { config, tools }
    }

    /// Build all images; `progress` receives a short message per step
    pub fn run(&self, request: &BuildRequest, progress: &dyn Fn(&str)) -> Result<BuildReport> {
        let mut root = PreparedRoot::new(&request.root);
        let stash = ModuleStash::new(&request.workdir);

        if request.prepare {
            progress("Preparing tree");
            tree::move_modules(&root)?;
            tree::create_depmod_conf(&root)?;
        }

        let kernels = kernel::discover(root.path(), &self.config.kernel.basearch)?;
        if kernels.is_empty() {
            return Err(ConfigError::MissingInput {
                path: root
                    .path()
                    .join(kernel::boot_dir(&self.config.kernel.basearch))
                    .join("vmlinuz-*"),
            }
            .into());
        }
        kernel::check_image_names(&kernels)?;

        let mut prepared = Vec::with_capacity(kernels.len());
        let mut kept_firmware = BTreeSet::new();
        for kernel in kernels {
            progress(&format!("Pruning modules for {}", kernel.version));
            let result = self.prepare_kernel(&root, &stash, kernel, &kept_firmware)?;
            kept_firmware.extend(result.selection.firmware.iter().cloned());
            prepared.push(result);
        }

        let layout = self.config.layout();
        let mut assembler = ImageAssembler::new(self.tools.toolbox)
            .with_image_size(self.config.image.rootfs_size)
            .with_label(self.config.image.label.clone());

        let mut report = BuildReport::default();
        for item in prepared {
            progress(&format!("Building image for {}", item.kernel.version));
            let started = Instant::now();
            let image = self.assemble_kernel(
                &mut root,
                &stash,
                &mut assembler,
                layout,
                &item.kernel,
                request,
            )?;

            report.kernels.push(KernelReport {
                version: item.kernel.version.clone(),
                kernel_type: item.kernel.kernel_type,
                sha256: report::sha256_file(&image.path)?,
                image: image.path,
                size: image.size,
                retained_modules: item.selection.retained_modules.into_iter().collect(),
                removed_modules: item.selection.removed_modules.len(),
                removed_firmware: item.selection.removed_firmware.len(),
                module_info_records: item.module_info_records,
                elapsed_secs: started.elapsed().as_secs_f64(),
            });
        }

        Ok(report)
    }

    /// Prune, describe, compress, index and stash the modules of one kernel
    pub fn prepare_kernel(
        &self,
        root: &PreparedRoot,
        stash: &ModuleStash,
        kernel: KernelDescriptor,
        kept_firmware: &BTreeSet<String>,
    ) -> Result<PreparedKernel> {
        let moddir = root.kernel_modules_dir(&kernel.version);
        if !moddir.is_dir() {
            return Err(ConfigError::MissingInput { path: moddir }.into());
        }

        let graph = ModuleGraph::load(&moddir)?;
        let closure = ClosureResolver::new(&moddir).resolve(&self.config.seeds(), &graph)?;
        tracing::info!(
            "Kernel {}: {} modules required",
            kernel.version,
            closure.modules.len()
        );

        let selection = FirmwareSelector::new(self.tools.metadata)
            .with_extra_firmware(kept_firmware.iter().cloned())
            .select(&closure.modules, &moddir, &root.firmware_dir())?;

        let files = moddep::module_files(&moddir)?;
        let module_info_records = ModuleListWriter::new(self.tools.metadata).write(
            &moddir,
            &files,
            &root.modules_dir().join("module-info"),
        )?;

        tree::compress_modules(&moddir, self.tools.module_compressor)?;
        tree::run_depmod(root, &kernel.version, self.tools.indexer, stash)?;

        Ok(PreparedKernel {
            kernel,
            selection,
            module_info_records,
        })
    }

    fn assemble_kernel(
        &self,
        root: &mut PreparedRoot,
        stash: &ModuleStash,
        assembler: &mut ImageAssembler<'_>,
        layout: Layout,
        kernel: &KernelDescriptor,
        request: &BuildRequest,
    ) -> Result<AssembledImage> {
        let output = request.output_dir.join(kernel.kernel_type.image_name());
        let scratch = scratch_dir(&request.workdir, &kernel.version);

        let relocation = ModuleRelocation::acquire(root, stash, &kernel.version)?;
        let tree = relocation.root().path().to_path_buf();

        if layout == Layout::Layered && !assembler.has_base_artifact(&kernel.version) {
            let base = self
                .tools
                .base_generator
                .generate(&tree, kernel, &request.workdir)?;
            assembler.register_base_artifact(&kernel.version, base);
        }

        let image = assembler.assemble(layout, &tree, kernel, &scratch, &output)?;
        relocation.release()?;
        Ok(image)
    }
}

/// Per-kernel working directory for layered builds
fn scratch_dir(workdir: &Path, version: &str) -> PathBuf {
    workdir.join(format!("live-{version}"))
}
