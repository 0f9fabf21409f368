//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod doctor;
pub mod kernels;
pub mod resolve;

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

use crate::core::config::BuildConfig;
use crate::infra::dirs::InstreeDirs;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prune modules and firmware and build an image for every kernel
    Build {
        /// Prepared root tree
        #[arg(long)]
        root: PathBuf,

        /// Working directory for stashed modules and intermediate files
        #[arg(long)]
        workdir: PathBuf,

        /// Directory the images are written to
        #[arg(long)]
        output: PathBuf,

        /// Module or =group to keep (repeatable; replaces the configured list)
        #[arg(long = "keep", value_name = "MODULE")]
        keep: Vec<String>,

        /// Compressor program, or "squashfs" for a live image
        #[arg(long)]
        compression: Option<String>,

        /// Arguments for the compressor
        #[arg(long, allow_hyphen_values = true)]
        compression_args: Option<String>,

        /// Skip moving lib/modules and writing the depmod config
        #[arg(long)]
        no_prepare: bool,
    },

    /// Print the module closure for a module directory
    Resolve {
        /// Directory holding modules.dep and the group listings
        #[arg(long)]
        moddir: PathBuf,

        /// Module or =group to keep (repeatable; replaces the configured list)
        #[arg(long = "keep", value_name = "MODULE")]
        keep: Vec<String>,
    },

    /// List kernels in a root tree in build order
    Kernels {
        /// Prepared root tree
        #[arg(long)]
        root: PathBuf,
    },

    /// Check that the external tools a build needs are installed
    Doctor,
}

impl Commands {
    /// Execute the command
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let mut config = load_config(config_path)?;

        match self {
            Commands::Build {
                root,
                workdir,
                output,
                keep,
                compression,
                compression_args,
                no_prepare,
            } => {
                if !keep.is_empty() {
                    config.modules.keep = keep;
                }
                if let Some(compression) = compression {
                    config.image.compression = compression;
                }
                if let Some(args) = compression_args {
                    config.image.compression_args = args;
                }
                config.validate().context("Invalid build options")?;
                build::execute(&config, &root, &workdir, &output, !no_prepare)
            }
            Commands::Resolve { moddir, keep } => {
                if !keep.is_empty() {
                    config.modules.keep = keep;
                }
                resolve::execute(&config, &moddir)
            }
            Commands::Kernels { root } => kernels::execute(&config, &root),
            Commands::Doctor => doctor::execute(&config),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BuildConfig> {
    let (config, source) = BuildConfig::load(path, &InstreeDirs::new())
        .context("Failed to load configuration")?;
    if let Some(source) = source {
        tracing::info!("Using config {}", source.display());
    }
    Ok(config)
}
