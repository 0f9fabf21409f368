//! CLI command for `instree kernels`

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::output::{is_json, print_info};
use crate::core::config::BuildConfig;
use crate::core::kernel;

/// List kernels in build order
pub fn execute(config: &BuildConfig, root: &Path) -> Result<()> {
    let kernels = kernel::discover(root, &config.kernel.basearch)
        .with_context(|| format!("Cannot scan {} for kernels", root.display()))?;

    if is_json() {
        println!("{}", serde_json::to_string_pretty(&kernels)?);
        return Ok(());
    }

    if kernels.is_empty() {
        print_info("No kernels found");
        return Ok(());
    }
    for k in &kernels {
        println!("{}\t{}\t{}", k.version, k.kernel_type, k.kernel_type.image_name());
    }
    Ok(())
}
