//! Project configuration loaded from `.cohort/config.toml`.

use crate::core::error::CohortError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

pub const DEFAULT_STALE_MINUTES: i64 = 30;

/// Project-level mapping from policy severities to "must block the commit".
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Permissive,
    #[default]
    Moderate,
    Strict,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strictness::Permissive => "permissive",
            Strictness::Moderate => "moderate",
            Strictness::Strict => "strict",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Strictness {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permissive" => Ok(Strictness::Permissive),
            "moderate" => Ok(Strictness::Moderate),
            "strict" => Ok(Strictness::Strict),
            other => Err(CohortError::ValidationError(format!(
                "unknown strictness '{}' (expected permissive, moderate or strict)",
                other
            ))),
        }
    }
}

/// Which variant of a rule's teaching text to show.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Expert,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct StackConfig {
    /// UI/styling packages the project itself depends on. Imports of these are never flagged
    /// by `ui-import` rules.
    #[serde(default)]
    pub ui: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub experience_level: ExperienceLevel,
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: i64,
    #[serde(default)]
    pub stack: StackConfig,
}

fn default_stale_minutes() -> i64 {
    DEFAULT_STALE_MINUTES
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            experience_level: ExperienceLevel::default(),
            stale_minutes: DEFAULT_STALE_MINUTES,
            stack: StackConfig::default(),
        }
    }
}

/// Loads the project config. A missing file means defaults; a malformed one is an error.
pub fn load_config(store: &Store) -> Result<ProjectConfig, CohortError> {
    let path = store.config_path();
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    let config: ProjectConfig = toml::from_str(&content).map_err(|e| {
        CohortError::ValidationError(format!("{}: {}", path.display(), e))
    })?;
    if config.stale_minutes <= 0 {
        return Err(CohortError::ValidationError(format!(
            "{}: stale_minutes must be positive",
            path.display()
        )));
    }
    Ok(config)
}

/// Writes the default config unless one already exists. Returns true when a file was written.
pub fn write_default_config(store: &Store) -> Result<bool, CohortError> {
    let path = store.config_path();
    if path.exists() {
        return Ok(false);
    }
    let body = toml::to_string_pretty(&ProjectConfig::default())
        .map_err(|e| CohortError::ValidationError(e.to_string()))?;
    fs::create_dir_all(store.state_dir())?;
    fs::write(&path, body)?;
    Ok(true)
}
