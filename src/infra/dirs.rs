//! Platform-specific directory management
//!
//! Locates the configuration directory. `INSTREE_CONFIG_DIR` overrides the
//! platform default (`$XDG_CONFIG_HOME/instree` or `~/.config/instree` on
//! Linux).

use std::env;
use std::path::PathBuf;

use crate::config::defaults::CONFIG_FILE_NAME;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "INSTREE_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "instree";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct InstreeDirs {
    config_dir: PathBuf,
}

impl InstreeDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Get the config directory path
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Path of `instree.toml` in the config directory
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for InstreeDirs {
    fn default() -> Self {
        Self::new()
    }
}
