//! Build report
//!
//! Summary of a run, printed by the CLI or serialized with `--json`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::core::kernel::KernelType;
use crate::error::FilesystemError;

/// Outcome for one kernel
#[derive(Debug, Clone, Serialize)]
pub struct KernelReport {
    pub version: String,
    #[serde(rename = "type")]
    pub kernel_type: KernelType,
    pub image: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub retained_modules: Vec<String>,
    pub removed_modules: usize,
    pub removed_firmware: usize,
    pub module_info_records: usize,
    pub elapsed_secs: f64,
}

/// Outcome of a build run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub kernels: Vec<KernelReport>,
}

impl BuildReport {
    pub fn total_size(&self) -> u64 {
        self.kernels.iter().map(|k| k.size).sum()
    }
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String, FilesystemError> {
    let read_err = |e: std::io::Error| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
