//! Module dependency graph
//!
//! Parses a `modules.dep` listing into a name -> dependencies graph.
//! Each line reads `<path>/<name>.ko: <path>/<dep>.ko ...`; only base names
//! (directory and extension stripped) are kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ConfigError, FilesystemError, InstreeError, ModuleError};

/// Dependency listing written by depmod
pub const MODULES_DEP: &str = "modules.dep";

/// Suffixes a module file may carry after `.ko`
const COMPRESSED_SUFFIXES: &[&str] = &[".gz", ".xz", ".zst"];

/// Base name of a module file (`sd_mod.ko`, `sd_mod.ko.gz`, ...), or `None` for other files
pub fn module_file_stem(file_name: &str) -> Option<&str> {
    let uncompressed = COMPRESSED_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name);
    uncompressed.strip_suffix(".ko").filter(|s| !s.is_empty())
}

/// Module files below `moddir`, keyed by base name
pub fn module_files(moddir: &Path) -> Result<BTreeMap<String, PathBuf>, FilesystemError> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(moddir).follow_links(false) {
        let entry = entry.map_err(|e| FilesystemError::Walk {
            path: moddir.to_path_buf(),
            error: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(stem) = entry.file_name().to_str().and_then(module_file_stem) {
            files.insert(stem.to_string(), entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// One `modules.dep` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Module base name
    pub name: String,
    /// Dependency base names, in listing order
    pub depends: Vec<String>,
}

/// Dependency graph in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleGraph {
    entries: Vec<ModuleEntry>,
}

/// Strip the directory and the `.ko` extension from a module path
fn module_base_name(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    let name = file.strip_suffix(".ko")?;
    (!name.is_empty()).then_some(name)
}

impl ModuleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the contents of a dependency listing
    ///
    /// Blank lines are skipped. Any other line that does not match the
    /// expected shape is an error.
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        let mut graph = Self::new();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = || ModuleError::Malformed {
                line_no: idx + 1,
                line: line.to_string(),
            };

            let (subject, deps) = line.split_once(':').ok_or_else(malformed)?;
            let name = module_base_name(subject.trim()).ok_or_else(malformed)?;
            let depends = deps
                .split_whitespace()
                .map(|dep| module_base_name(dep).map(String::from).ok_or_else(malformed))
                .collect::<Result<Vec<_>, _>>()?;

            graph.add_module(name, depends);
        }

        Ok(graph)
    }

    /// Read and parse `<moddir>/modules.dep`
    pub fn load(moddir: &Path) -> Result<Self, InstreeError> {
        let path = moddir.join(MODULES_DEP);
        if !path.is_file() {
            return Err(ConfigError::MissingInput { path }.into());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let graph = Self::parse(&contents)?;
        tracing::debug!("Parsed {} entries from {}", graph.len(), path.display());
        Ok(graph)
    }

    /// Append a module entry
    pub fn add_module(&mut self, name: &str, depends: Vec<String>) {
        self.entries.push(ModuleEntry {
            name: name.to_string(),
            depends,
        });
    }

    /// Entries in listing order
    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the graph has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dependencies of a module; `None` for names the listing never mentions as a subject
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.depends.as_slice())
    }
}
