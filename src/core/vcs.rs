//! Read-only access to version control.
//!
//! Policy checks see the staged changeset through the [`Changeset`] trait. The git-backed
//! implementation shells out to `git`; tests use [`StaticChangeset`]. Nothing here ever
//! writes to the repository.

use crate::core::error::CohortError;
use crate::core::glob::normalize_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    fn from_status_letter(letter: char) -> Option<Self> {
        match letter {
            'A' | 'C' => Some(ChangeKind::Added),
            'M' | 'T' => Some(ChangeKind::Modified),
            'D' => Some(ChangeKind::Deleted),
            'R' => Some(ChangeKind::Renamed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub kind: ChangeKind,
}

/// The staged side of a commit, as seen by the policy engine.
pub trait Changeset: Sync {
    fn staged_files(&self) -> Result<Vec<StagedFile>, CohortError>;
    /// Staged blob contents (not the working-tree copy).
    fn staged_content(&self, path: &str) -> Result<Vec<u8>, CohortError>;
    fn staged_size(&self, path: &str) -> Result<u64, CohortError>;
}

pub struct GitChangeset {
    repo_root: PathBuf,
}

impl GitChangeset {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }
}

fn run_git(repo_root: &Path, scope: &str, args: &[&str]) -> Result<Output, CohortError> {
    tracing::debug!(scope, ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| CohortError::ExternalToolFailure {
            tool: "git".to_string(),
            message: format!("{}: {}", scope, e),
        })?;
    if !output.status.success() {
        return Err(CohortError::ExternalToolFailure {
            tool: "git".to_string(),
            message: format!(
                "{}: {}",
                scope,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

/// Parses `git diff --cached --name-status -z` output.
pub fn parse_name_status(raw: &[u8]) -> Vec<StagedFile> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = text.split('\0').filter(|f| !f.is_empty());
    let mut out = Vec::new();
    while let Some(status) = fields.next() {
        let Some(kind) = status.chars().next().and_then(ChangeKind::from_status_letter) else {
            // Unknown status letters still carry one path.
            fields.next();
            continue;
        };
        let path = if matches!(status.chars().next(), Some('R') | Some('C')) {
            // Renames and copies list the old path first.
            fields.next();
            fields.next()
        } else {
            fields.next()
        };
        if let Some(path) = path {
            out.push(StagedFile {
                path: normalize_path(path),
                kind,
            });
        }
    }
    out
}

impl Changeset for GitChangeset {
    fn staged_files(&self) -> Result<Vec<StagedFile>, CohortError> {
        let out = run_git(
            &self.repo_root,
            "staged_files",
            &["diff", "--cached", "--name-status", "-z"],
        )?;
        Ok(parse_name_status(&out.stdout))
    }

    fn staged_content(&self, path: &str) -> Result<Vec<u8>, CohortError> {
        let spec = format!(":{}", path);
        Ok(run_git(&self.repo_root, "staged_content", &["show", &spec])?.stdout)
    }

    fn staged_size(&self, path: &str) -> Result<u64, CohortError> {
        let spec = format!(":{}", path);
        let out = run_git(&self.repo_root, "staged_size", &["cat-file", "-s", &spec])?;
        String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse::<u64>()
            .map_err(|e| CohortError::ExternalToolFailure {
                tool: "git".to_string(),
                message: format!("staged_size: {}", e),
            })
    }
}

/// Current `HEAD` commit, or `None` for a repository without commits.
pub fn head_commit(repo_root: &Path) -> Result<Option<String>, CohortError> {
    match run_git(repo_root, "head_commit", &["rev-parse", "--verify", "-q", "HEAD"]) {
        Ok(out) => Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string())),
        Err(_) if is_repository(repo_root) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Subject line of a commit.
pub fn commit_subject(repo_root: &Path, rev: &str) -> Result<String, CohortError> {
    let out = run_git(repo_root, "commit_subject", &["log", "-1", "--format=%s", rev])?;
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

pub fn is_repository(repo_root: &Path) -> bool {
    run_git(repo_root, "is_repository", &["rev-parse", "--git-dir"]).is_ok()
}

/// In-memory changeset for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticChangeset {
    files: BTreeMap<String, (ChangeKind, Vec<u8>)>,
}

impl StaticChangeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, path: &str, kind: ChangeKind, content: impl Into<Vec<u8>>) -> Self {
        self.files
            .insert(normalize_path(path), (kind, content.into()));
        self
    }
}

impl Changeset for StaticChangeset {
    fn staged_files(&self) -> Result<Vec<StagedFile>, CohortError> {
        Ok(self
            .files
            .iter()
            .map(|(path, (kind, _))| StagedFile {
                path: path.clone(),
                kind: *kind,
            })
            .collect())
    }

    fn staged_content(&self, path: &str) -> Result<Vec<u8>, CohortError> {
        self.files
            .get(path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| CohortError::NotFound(format!("staged file {}", path)))
    }

    fn staged_size(&self, path: &str) -> Result<u64, CohortError> {
        Ok(self.staged_content(path)?.len() as u64)
    }
}
