//! Core logic
//!
//! External programs are reached only through the traits in [`tools`];
//! their process-backed implementations live in [`crate::infra::tools`].
//!
//! # Submodules
//!
//! - [`kernel`] - Kernel discovery under `boot/`
//! - [`moddep`] - `modules.dep` parsing
//! - [`resolver`] - Module closure over seeds and groups
//! - [`firmware`] - Firmware selection and pruning
//! - [`module_info`] - The installer's `module-info` listing
//! - [`tree`] - Root tree preparation (module moves, compression, depmod)
//! - [`relocate`] - Scoped move of a kernel's modules out of the root
//! - [`assemble`] - Flat and layered image assembly
//! - [`pipeline`] - Per-kernel build orchestration
//! - [`config`] - `instree.toml` handling
//! - [`doctor`] - Host tool checks
//! - [`report`] - Build summaries

pub mod assemble;
pub mod config;
pub mod doctor;
pub mod firmware;
pub mod kernel;
pub mod moddep;
pub mod module_info;
pub mod pipeline;
pub mod relocate;
pub mod report;
pub mod resolver;
pub mod tools;
pub mod tree;
