//! Project layout for Cohort's on-disk state.
//!
//! A project is any directory containing a `.cohort/` folder. Everything Cohort writes lives
//! beneath it: the shared datastore, the health snapshot, the config and policy documents.

use crate::core::error::CohortError;
use crate::core::schemas;
use std::path::{Path, PathBuf};

/// Handle to a project's state directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Repository root (the directory that contains `.cohort/`)
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walks up from `start_dir` until a directory containing `.cohort/` is found.
    pub fn discover(start_dir: &Path) -> Result<Self, CohortError> {
        let mut current_dir = PathBuf::from(start_dir);
        loop {
            if current_dir.join(schemas::COHORT_DIR_NAME).is_dir() {
                return Ok(Self::new(current_dir));
            }
            if !current_dir.pop() {
                return Err(CohortError::NotInitialized(format!(
                    "'{}' directory not found in {} or its parents",
                    schemas::COHORT_DIR_NAME,
                    start_dir.display()
                )));
            }
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(schemas::COHORT_DIR_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join(schemas::COHORT_DB_NAME)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir().join(schemas::HEALTH_SNAPSHOT_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(schemas::CONFIG_FILE_NAME)
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.state_dir().join(schemas::POLICIES_DIR_NAME)
    }

    /// Project display name: the root directory's file name.
    pub fn project_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    }
}
