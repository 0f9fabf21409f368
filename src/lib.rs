//! instree - installer runtime image builder
//!
//! Turns a prepared root filesystem tree into boot images for every kernel
//! it contains: the module set is closed over `modules.dep`, firmware nobody
//! asks for is dropped, and the tree is packed either as one compressed cpio
//! archive or as a squashfs live image appended to a dracut initramfs.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Module closure, firmware selection and image assembly
//! - [`infra`] - Filesystem helpers and the external tool adapters
//! - [`config`] - Constants and defaults
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
