//! module-info manifest
//!
//! Writes the storage and network driver list read by the installer's
//! module loader. The format is a `Version 0` header followed by one
//! three-line record per driver:
//!
//! ```text
//! sd_mod
//! 	scsi
//! 	"SCSI disk (sd) driver"
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::defaults::DESCRIPTION_WIDTH;
use crate::core::moddep::module_file_stem;
use crate::core::resolver::read_group_file;
use crate::core::tools::MetadataQuery;
use crate::error::InstreeError;
use crate::infra::filesystem;

/// Modules that never get a record
const EXCLUDED_MODULES: &[&str] = &["floppy", "libiscsi", "scsi_mod"];

/// Listed driver categories: (record type, listing file)
const CATEGORIES: &[(&str, &str)] = &[("scsi", "modules.block"), ("eth", "modules.networking")];

/// One module-info record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub name: String,
    pub category: String,
    pub description: String,
}

impl ModuleRecord {
    fn render(&self, out: &mut String) {
        // Writing to a String cannot fail
        let _ = write!(
            out,
            "{}\n\t{}\n\t\"{}\"\n",
            self.name, self.category, self.description
        );
    }
}

/// Builds the module-info manifest for one kernel
pub struct ModuleListWriter<'a> {
    query: &'a dyn MetadataQuery,
}

impl<'a> ModuleListWriter<'a> {
    pub fn new(query: &'a dyn MetadataQuery) -> Self {
        Self { query }
    }

    /// Collect records for the listed drivers present in `module_files`
    ///
    /// `module_files` maps base names to module file paths. A driver listed
    /// in both categories keeps the later (network) record.
    pub fn records(
        &self,
        moddir: &Path,
        module_files: &BTreeMap<String, PathBuf>,
    ) -> Result<BTreeMap<String, ModuleRecord>, InstreeError> {
        let mut records = BTreeMap::new();

        for (category, list) in CATEGORIES {
            for entry in read_group_file(&moddir.join(list))? {
                let file_name = entry.rsplit('/').next().unwrap_or(&entry);
                let name = module_file_stem(file_name).unwrap_or(file_name);
                if EXCLUDED_MODULES.contains(&name) {
                    continue;
                }
                let Some(path) = module_files.get(name) else {
                    continue;
                };

                let description = self.describe(name, path)?;
                records.insert(
                    name.to_string(),
                    ModuleRecord {
                        name: name.to_string(),
                        category: (*category).to_string(),
                        description,
                    },
                );
            }
        }

        Ok(records)
    }

    fn describe(&self, name: &str, path: &Path) -> Result<String, InstreeError> {
        let output = self.query.description(path)?;
        let first = output.lines().next().map(str::trim).unwrap_or_default();
        if first.is_empty() {
            tracing::debug!("No description for {name}, using fallback");
            return Ok(format!("{name} driver"));
        }
        Ok(first.chars().take(DESCRIPTION_WIDTH).collect())
    }

    /// Render the manifest text
    pub fn render(records: &BTreeMap<String, ModuleRecord>) -> String {
        let mut out = String::from("Version 0\n");
        for record in records.values() {
            record.render(&mut out);
        }
        out
    }

    /// Build and write the manifest to `output`
    pub fn write(
        &self,
        moddir: &Path,
        module_files: &BTreeMap<String, PathBuf>,
        output: &Path,
    ) -> Result<usize, InstreeError> {
        let records = self.records(moddir, module_files)?;
        filesystem::write_file(output, &Self::render(&records))?;
        tracing::info!("Wrote {} module-info records to {}", records.len(), output.display());
        Ok(records.len())
    }
}
