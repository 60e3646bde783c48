//! Store configuration.
//!
//! A [`StoreConfig`] is either built in code with [`StoreConfig::new`] or
//! loaded from a TOML file:
//!
//! ```toml
//! workspaces_dir = "workspaces"
//! fsync = true
//! strict_validation = false
//! ```
//!
//! A relative `workspaces_dir` is resolved against the directory that holds
//! the config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AnnostoreError, Result};

/// Settings shared by every workspace in one store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per workspace.
    pub workspaces_dir: PathBuf,

    /// Fsync temp files before renaming them, and directories after.
    #[serde(default = "enabled")]
    pub fsync: bool,

    /// Reject saves whose validation report has warnings, not only errors.
    #[serde(default)]
    pub strict_validation: bool,
}

fn enabled() -> bool {
    true
}

impl StoreConfig {
    /// Default settings for a store rooted at `workspaces_dir`.
    pub fn new(workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
            fsync: true,
            strict_validation: false,
        }
    }

    /// Loads settings from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| AnnostoreError::io(path, source))?;
        let mut config = Self::from_toml_str(&text).map_err(|message| AnnostoreError::Config {
            path: path.to_path_buf(),
            message,
        })?;

        if config.workspaces_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.workspaces_dir = base.join(&config.workspaces_dir);
            }
        }
        Ok(config)
    }

    /// Parses settings from TOML text. Relative paths are left as written.
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }
}
