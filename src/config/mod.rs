//! Configuration constants
//!
//! - [`defaults`] - Default values and fixed names required by the boot convention

pub mod defaults;
