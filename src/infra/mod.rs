//! Infrastructure layer
//!
//! Handles all I/O operations: filesystem and external processes.

pub mod dirs;
pub mod filesystem;
pub mod process;
pub mod tools;
