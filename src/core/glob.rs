//! Glob matching shared by the claim ledger and the policy engine.
//!
//! Semantics follow the usual shell/gitignore conventions: `*` and `?` stay inside one path
//! segment, `**` spans segments, and a pattern ending in `/` covers everything under that
//! directory.

use crate::core::error::CohortError;
use globset::{GlobBuilder, GlobMatcher};

/// Strips `./` prefixes and normalizes separators so stored patterns and queried paths agree.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

fn expand_directory_pattern(pattern: &str) -> String {
    let normalized = normalize_path(pattern);
    if normalized.ends_with('/') {
        format!("{}**", normalized)
    } else {
        normalized
    }
}

/// Compiles a path glob with segment-aware `*`.
pub fn compile(pattern: &str) -> Result<GlobMatcher, CohortError> {
    let expanded = expand_directory_pattern(pattern);
    GlobBuilder::new(&expanded)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| CohortError::ValidationError(format!("invalid glob '{}': {}", pattern, e)))
}

/// A compiled file filter. Patterns without a `/` match the file name in any directory
/// (`*.ts`, `.env*`); patterns with a `/` match the whole relative path.
#[derive(Debug, Clone)]
pub struct FileFilter {
    by_name: Vec<GlobMatcher>,
    by_path: Vec<GlobMatcher>,
}

impl FileFilter {
    pub fn new(patterns: &[String]) -> Result<Self, CohortError> {
        let mut by_name = Vec::new();
        let mut by_path = Vec::new();
        for pattern in patterns {
            let matcher = compile(pattern)?;
            if normalize_path(pattern).contains('/') {
                by_path.push(matcher);
            } else {
                by_name.push(matcher);
            }
        }
        Ok(Self { by_name, by_path })
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_path.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let name = path.rsplit('/').next().unwrap_or(path.as_str());
        self.by_name.iter().any(|m| m.is_match(name)) || self.by_path.iter().any(|m| m.is_match(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_star_stays_in_segment() {
        let m = compile("src/*.ts").unwrap();
        assert!(m.is_match("src/app.ts"));
        assert!(!m.is_match("src/routes/app.ts"));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let m = compile("src/**/*.ts").unwrap();
        assert!(m.is_match("src/app.ts"));
        assert!(m.is_match("src/routes/users/app.ts"));
        assert!(!m.is_match("lib/app.ts"));
    }

    #[test]
    fn test_trailing_slash_claims_directory() {
        let m = compile("docs/").unwrap();
        assert!(m.is_match("docs/README.md"));
        assert!(m.is_match("docs/a/b.md"));
        assert!(!m.is_match("src/docs.rs"));
    }

    #[test]
    fn test_normalize_strips_dot_slash() {
        assert_eq!(normalize_path("./src/a.rs"), "src/a.rs");
        assert_eq!(normalize_path("src\\a.rs"), "src/a.rs");
    }

    #[test]
    fn test_invalid_glob_is_validation_error() {
        assert!(matches!(
            compile("src/[a"),
            Err(CohortError::ValidationError(_))
        ));
    }

    #[test]
    fn test_file_filter_name_and_path_patterns() {
        let filter = FileFilter::new(&["*.ts".to_string(), "config/**".to_string()]).unwrap();
        assert!(filter.matches("src/deep/a.ts"));
        assert!(filter.matches("config/app.yaml"));
        assert!(!filter.matches("src/a.rs"));
        assert!(FileFilter::new(&[]).unwrap().is_empty());
    }
}
