//! Error types for instree
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and required-input errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required input file is absent
    #[error("Required input not found: {path}")]
    MissingInput { path: PathBuf },

    /// Config file could not be read
    #[error("Failed to read config file '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Config file is not valid TOML for the expected schema
    #[error("Failed to parse config file '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// A value is present but unusable
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Two kernels map to the same output image
    #[error("Kernels {first} and {second} would both be written to {image}")]
    ImageNameClash {
        image: String,
        first: String,
        second: String,
    },
}

/// Module dependency listing errors
#[derive(Error, Debug)]
pub enum ModuleError {
    /// A line of the dependency listing does not have the `<path>.ko: deps` shape
    #[error("Malformed dependency line {line_no}: '{line}'")]
    Malformed { line_no: usize, line: String },
}

/// External program errors
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program could not be started
    #[error("Failed to run '{tool}': {error}")]
    Spawn { tool: String, error: String },

    /// The program exited unsuccessfully
    #[error("'{tool}' exited with {}: {stderr}", status.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    Failed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Streaming data to or from the program failed
    #[error("I/O error while talking to '{tool}': {error}")]
    Io { tool: String, error: String },
}

impl ToolError {
    /// Exit status of a failed tool, if it exited normally
    pub fn status(&self) -> Option<i32> {
        match self {
            Self::Failed { status, .. } => *status,
            _ => None,
        }
    }
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to remove file
    #[error("Failed to remove file '{path}': {error}")]
    RemoveFile { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to move a file or directory
    #[error("Failed to move '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to create a symlink
    #[error("Failed to link '{path}' -> '{target}': {error}")]
    Symlink {
        path: PathBuf,
        target: PathBuf,
        error: String,
    },

    /// Failed to walk a directory tree
    #[error("Failed to walk '{path}': {error}")]
    Walk { path: PathBuf, error: String },
}

/// Image assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Layered mode needs a base initramfs for the kernel
    #[error("No base initramfs for kernel {version}; it must be generated before the live image")]
    MissingBaseArtifact { version: String },

    /// An external tool failed during a stage
    #[error("{stage}: {source}")]
    Tool {
        stage: String,
        #[source]
        source: ToolError,
    },

    /// A filesystem operation failed during a stage
    #[error("{stage}: {source}")]
    Filesystem {
        stage: String,
        #[source]
        source: FilesystemError,
    },
}

/// Top-level instree error type
#[derive(Error, Debug)]
pub enum InstreeError {
    /// Config error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Module listing error
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// External tool error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Assembly error
    #[error("Image assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
}

/// Result alias used throughout the core
pub type Result<T, E = InstreeError> = std::result::Result<T, E>;
