//! Module closure resolution
//!
//! Expands the configured seed list (plain module names and `=group`
//! tokens) and closes it under the "depends-on" relation of a
//! [`ModuleGraph`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::moddep::ModuleGraph;
use crate::error::ConfigError;

/// Prefix marking a seed as a module group
pub const GROUP_PREFIX: char = '=';

/// A seed for the closure
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Seed {
    /// A single module by base name
    Module(String),
    /// A named group listed in a `modules.<group>` file
    Group(String),
}

impl Seed {
    /// Parse a seed token
    pub fn parse(token: &str) -> Self {
        match token.strip_prefix(GROUP_PREFIX) {
            Some(group) => Self::Group(group.to_string()),
            None => Self::Module(token.to_string()),
        }
    }
}

/// Name of the file listing the members of a module group
///
/// `scsi` and `ata` share the block device list, `net` maps to the
/// networking list, anything else to `modules.<group>`.
pub fn group_file_name(group: &str) -> String {
    match group {
        "scsi" | "ata" => "modules.block".to_string(),
        "net" => "modules.networking".to_string(),
        other => format!("modules.{other}"),
    }
}

/// Read a group listing: one module per line, trailing `.ko` stripped
pub fn read_group_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_suffix(".ko").unwrap_or(l).to_string())
        .collect())
}

/// Closure result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    /// Every module required by the seeds
    pub modules: BTreeSet<String>,
    /// Full scans of the graph needed to reach the fixed point
    pub passes: usize,
}

/// Resolves module closures against the group files of one module directory
#[derive(Debug, Clone)]
pub struct ClosureResolver {
    moddir: PathBuf,
}

impl ClosureResolver {
    /// Create a resolver reading group files from `moddir`
    pub fn new(moddir: impl Into<PathBuf>) -> Self {
        Self {
            moddir: moddir.into(),
        }
    }

    /// Expand seeds into the initial working set
    pub fn expand_seeds(&self, seeds: &[Seed]) -> Result<BTreeSet<String>, ConfigError> {
        let mut modules = BTreeSet::new();
        for seed in seeds {
            match seed {
                Seed::Module(name) => {
                    modules.insert(name.clone());
                }
                Seed::Group(group) => {
                    let path = self.moddir.join(group_file_name(group));
                    let members = read_group_file(&path)?;
                    tracing::debug!("Group '{group}' expands to {} modules", members.len());
                    modules.extend(members);
                }
            }
        }
        Ok(modules)
    }

    /// Expand the seeds and close them over `graph`
    pub fn resolve(&self, seeds: &[Seed], graph: &ModuleGraph) -> Result<Closure, ConfigError> {
        let initial = self.expand_seeds(seeds)?;
        Ok(close(initial, graph))
    }
}

/// Close `modules` under the dependency relation of `graph`
///
/// Scans the whole listing repeatedly, adding the dependencies of every
/// member, until a scan adds nothing. Dependencies missing from the
/// listing are kept as leaves.
pub fn close(mut modules: BTreeSet<String>, graph: &ModuleGraph) -> Closure {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut added = false;
        for entry in graph.entries() {
            if !modules.contains(&entry.name) {
                continue;
            }
            for dep in &entry.depends {
                if modules.insert(dep.clone()) {
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
    }

    tracing::debug!("Module closure: {} modules after {passes} passes", modules.len());
    Closure { modules, passes }
}
