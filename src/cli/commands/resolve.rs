//! CLI command for `instree resolve`

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::output::{is_json, is_quiet};
use crate::core::config::BuildConfig;
use crate::core::moddep::ModuleGraph;
use crate::core::resolver::ClosureResolver;

/// Print the closure of the configured seeds over `moddir`
pub fn execute(config: &BuildConfig, moddir: &Path) -> Result<()> {
    let graph = ModuleGraph::load(moddir)
        .with_context(|| format!("Cannot read module listing in {}", moddir.display()))?;
    let closure = ClosureResolver::new(moddir)
        .resolve(&config.seeds(), &graph)
        .context("Cannot expand module seeds")?;

    if is_json() {
        println!("{}", serde_json::to_string(&closure.modules)?);
        return Ok(());
    }

    for name in &closure.modules {
        println!("{name}");
    }
    if !is_quiet() {
        eprintln!(
            "{} modules after {} passes",
            closure.modules.len(),
            closure.passes
        );
    }
    Ok(())
}
