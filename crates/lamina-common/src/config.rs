//! Configuration model for an image graph.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LaminaError, Result};

/// Mount driver used to assemble root filesystems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Linux `OverlayFS`.
    #[default]
    Overlay,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlay => write!(f, "overlay"),
        }
    }
}

/// Root configuration for one image graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Storage root owned by the graph.
    pub root: PathBuf,
    /// Mount driver used for `mount`/`unmount`.
    #[serde(default)]
    pub driver: DriverKind,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            root: crate::constants::default_graph_root(),
            driver: DriverKind::default(),
        }
    }
}

impl GraphConfig {
    /// Creates a configuration rooted at `root` with the default driver.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            driver: DriverKind::default(),
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// names an empty storage root.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| LaminaError::storage(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        if config.root.as_os_str().is_empty() {
            return Err(LaminaError::Config {
                message: format!("{}: graph root must not be empty", path.display()),
            });
        }
        Ok(config)
    }
}
