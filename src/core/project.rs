//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project metadata directory
pub const PROJECT_DIR: &str = ".sitecare";

/// Represents a SiteCare project
#[derive(Debug)]
pub struct Project {
    /// Root directory of the project (parent of .sitecare/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current = std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project structure at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if root.join(PROJECT_DIR).exists() {
            return Err(ProjectError::AlreadyExists(root));
        }

        Self::write_skeleton(root)
    }

    /// Force initialization even if .sitecare/ exists
    ///
    /// Rewrites the default config; an existing store is left in place.
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self::write_skeleton(root)
    }

    fn write_skeleton(root: PathBuf) -> Result<Self, ProjectError> {
        let dir = root.join(PROJECT_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ProjectError::IoError(e.to_string()))?;

        std::fs::write(dir.join("config.yaml"), Self::default_config())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        Ok(Self { root })
    }

    fn default_config() -> &'static str {
        r#"# SiteCare Project Configuration

# Default actor stamped on audit fields (falls back to $USER)
# actor: ""

# Log level: error, warn, info, debug, trace
# log_level: warn
# log_json: false

# Deadline for every store call
# store_timeout_ms: 5000

# Warranty expiry monitoring
# expiry_threshold_days: 30
# sweep_interval_secs: 3600

# QA defect remediation deadlines, in days
# sla:
#   critical: 3
#   high: 5
#   medium: 7
#   low: 14
"#
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .sitecare metadata directory
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.meta_dir().join("config.yaml")
    }

    /// Location of the SQLite document store
    pub fn store_path(&self) -> PathBuf {
        self.meta_dir().join("store.db")
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not a SiteCare project (searched from {searched_from:?}). Run 'sitecare init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("SiteCare project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}
