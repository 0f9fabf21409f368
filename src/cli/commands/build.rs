//! CLI command for `instree build`

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::output::{create_spinner, format_size, is_json, print_detail, print_success};
use crate::core::config::BuildConfig;
use crate::core::pipeline::{BuildRequest, Builder};
use crate::infra::tools::SystemTools;

/// Execute the build command
pub fn execute(
    config: &BuildConfig,
    root: &Path,
    workdir: &Path,
    output: &Path,
    prepare: bool,
) -> Result<()> {
    if !root.is_dir() {
        anyhow::bail!("Root tree {} does not exist", root.display());
    }

    let tools = SystemTools::from_config(config);
    let builder = Builder::new(config, tools.host_tools());
    let request = BuildRequest {
        root: root.to_path_buf(),
        workdir: workdir.to_path_buf(),
        output_dir: output.to_path_buf(),
        prepare,
    };

    let spinner = create_spinner("Starting build");
    let result = builder.run(&request, &|msg| spinner.set_message(msg.to_string()));
    spinner.finish_and_clear();
    let report = result.with_context(|| format!("Build of {} failed", root.display()))?;

    if is_json() {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for kernel in &report.kernels {
        print_success(&format!(
            "{} ({}) -> {}",
            kernel.version,
            kernel.kernel_type,
            kernel.image.display()
        ));
        print_detail(&format!(
            "{}, sha256 {}",
            format_size(kernel.size),
            kernel.sha256
        ));
        print_detail(&format!(
            "{} modules kept, {} removed, {} firmware files removed, {:.1}s",
            kernel.retained_modules.len(),
            kernel.removed_modules,
            kernel.removed_firmware,
            kernel.elapsed_secs
        ));
    }
    print_success(&format!(
        "Built {} image(s), {} total",
        report.kernels.len(),
        format_size(report.total_size())
    ));
    Ok(())
}
