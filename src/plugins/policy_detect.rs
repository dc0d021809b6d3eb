//! Detection modes behind the policy engine.
//!
//! Each regex reports only the first line it matches in a file. That is the scanning contract:
//! a file with ten hardcoded passwords yields one finding per rule, not ten.

use crate::core::error::CohortError;
use crate::core::glob::{FileFilter, normalize_path};
use crate::core::vcs::{ChangeKind, Changeset, StagedFile};
use crate::plugins::policy::{
    ActionCheck, CompiledRule, DependencyGroup, Detection, GitHookCheck, HeuristicCheck,
    PatternContext, PatternSpec, PolicyEngine, PolicyResult,
};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub(crate) struct CompiledPattern {
    regexes: Vec<Regex>,
    include: FileFilter,
    exclude: FileFilter,
    context: Option<PatternContext>,
}

pub(crate) enum CompiledGitHook {
    Path { globs: FileFilter, exclude: FileFilter },
    Size { max_bytes: u64, include: FileFilter },
    Content(CompiledPattern),
}

pub(crate) struct SiblingTest {
    applies_to: FileFilter,
    exclude: FileFilter,
    test_variants: Vec<String>,
}

pub(crate) enum CompiledDetection {
    Pattern(CompiledPattern),
    GitHook(CompiledGitHook),
    Heuristic(SiblingTest),
    Action(Vec<DependencyGroup>),
}

fn compile_pattern(spec: &PatternSpec) -> Result<CompiledPattern, CohortError> {
    let sources = spec.all_patterns();
    if sources.is_empty() {
        return Err(CohortError::ValidationError(
            "pattern detection needs at least one regex".to_string(),
        ));
    }
    let regexes = sources
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| CohortError::ValidationError(format!("invalid regex '{}': {}", p, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledPattern {
        regexes,
        include: FileFilter::new(&spec.file_types)?,
        exclude: FileFilter::new(&spec.exclude)?,
        context: spec.context.clone(),
    })
}

/// Validates a detection descriptor and compiles its regexes and globs.
pub(crate) fn compile(detection: &Detection) -> Result<CompiledDetection, CohortError> {
    match detection {
        Detection::Pattern(spec) => Ok(CompiledDetection::Pattern(compile_pattern(spec)?)),
        Detection::GitHook(GitHookCheck::Path { globs, exclude }) => {
            if globs.is_empty() {
                return Err(CohortError::ValidationError(
                    "git-hook path check needs at least one glob".to_string(),
                ));
            }
            Ok(CompiledDetection::GitHook(CompiledGitHook::Path {
                globs: FileFilter::new(globs)?,
                exclude: FileFilter::new(exclude)?,
            }))
        }
        Detection::GitHook(GitHookCheck::Size { max_kb, file_types }) => {
            if *max_kb == 0 {
                return Err(CohortError::ValidationError(
                    "git-hook size check needs max_kb > 0".to_string(),
                ));
            }
            let max_bytes = max_kb.checked_mul(1024).ok_or_else(|| {
                CohortError::ValidationError(format!(
                    "git-hook size check max_kb {} is out of range",
                    max_kb
                ))
            })?;
            Ok(CompiledDetection::GitHook(CompiledGitHook::Size {
                max_bytes,
                include: FileFilter::new(file_types)?,
            }))
        }
        Detection::GitHook(GitHookCheck::Content(spec)) => Ok(CompiledDetection::GitHook(
            CompiledGitHook::Content(compile_pattern(spec)?),
        )),
        Detection::Heuristic(HeuristicCheck::SiblingTest {
            applies_to,
            test_variants,
            exclude,
        }) => {
            if applies_to.is_empty() || test_variants.is_empty() {
                return Err(CohortError::ValidationError(
                    "sibling-test needs applies_to and test_variants".to_string(),
                ));
            }
            Ok(CompiledDetection::Heuristic(SiblingTest {
                applies_to: FileFilter::new(applies_to)?,
                exclude: FileFilter::new(exclude)?,
                test_variants: test_variants.clone(),
            }))
        }
        Detection::Action(ActionCheck::DuplicateDeps { groups }) => {
            if groups.iter().any(|g| g.packages.len() < 2) {
                return Err(CohortError::ValidationError(
                    "duplicate-deps groups need at least two packages".to_string(),
                ));
            }
            Ok(CompiledDetection::Action(groups.clone()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LineHit {
    pub line: usize,
    pub matched: String,
}

fn applies(pattern: &CompiledPattern, path: &str) -> bool {
    (pattern.include.is_empty() || pattern.include.matches(path)) && !pattern.exclude.matches(path)
}

fn suppressed(pattern: &CompiledPattern, matched: &str, ui_stack: &[String]) -> bool {
    match pattern.context {
        Some(PatternContext::UiImport) => {
            let lower = matched.to_lowercase();
            ui_stack.iter().any(|pkg| lower.contains(pkg.as_str()))
        }
        None => false,
    }
}

/// First unsuppressed matching line per regex, 1-based.
pub(crate) fn scan_pattern(
    pattern: &CompiledPattern,
    path: &str,
    content: &str,
    ui_stack: &[String],
) -> Vec<LineHit> {
    if !applies(pattern, path) {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for regex in &pattern.regexes {
        let first = content.lines().enumerate().find_map(|(idx, line)| {
            regex
                .find(line)
                .map(|m| m.as_str().to_string())
                .filter(|m| !suppressed(pattern, m, ui_stack))
                .map(|matched| LineHit {
                    line: idx + 1,
                    matched,
                })
        });
        hits.extend(first);
    }
    hits
}

/// Runs pattern, git-hook and heuristic rules against one staged file.
pub(crate) fn check_staged_file(
    engine: &PolicyEngine,
    rules: &[CompiledRule],
    root: &Path,
    changeset: &dyn Changeset,
    file: &StagedFile,
    staged_paths: &FxHashSet<&str>,
) -> Vec<PolicyResult> {
    if file.kind == ChangeKind::Deleted {
        return Vec::new();
    }
    let path = file.path.as_str();
    let mut content: Option<String> = None;
    let mut unreadable = false;
    let mut out = Vec::new();

    for rule in rules {
        match &rule.detection {
            CompiledDetection::Pattern(pattern)
            | CompiledDetection::GitHook(CompiledGitHook::Content(pattern)) => {
                if !applies(pattern, path) || unreadable {
                    continue;
                }
                if content.is_none() {
                    match changeset.staged_content(path) {
                        Ok(bytes) => content = Some(String::from_utf8_lossy(&bytes).into_owned()),
                        Err(e) => {
                            tracing::warn!(path, error = %e, "skipping unreadable staged file");
                            unreadable = true;
                            continue;
                        }
                    }
                }
                let text = content.as_deref().unwrap_or_default();
                for hit in scan_pattern(pattern, path, text, engine.ui_stack()) {
                    out.push(engine.make_result(rule, Some(path), Some(hit.line), Some(hit.matched)));
                }
            }
            CompiledDetection::GitHook(CompiledGitHook::Path { globs, exclude }) => {
                if globs.matches(path) && !exclude.matches(path) {
                    out.push(engine.make_result(rule, Some(path), None, Some(path.to_string())));
                }
            }
            CompiledDetection::GitHook(CompiledGitHook::Size { max_bytes, include }) => {
                if !include.is_empty() && !include.matches(path) {
                    continue;
                }
                match changeset.staged_size(path) {
                    Ok(size) if size > *max_bytes => {
                        out.push(engine.make_result(
                            rule,
                            Some(path),
                            None,
                            Some(format!("{} KB", size.div_ceil(1024))),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(path, error = %e, "could not size staged file"),
                }
            }
            CompiledDetection::Heuristic(sibling) => {
                if file.kind != ChangeKind::Added {
                    continue;
                }
                if let Some(expected) = missing_sibling_test(sibling, root, path, staged_paths) {
                    out.push(engine.make_result(rule, Some(path), None, Some(expected)));
                }
            }
            CompiledDetection::Action(_) => {}
        }
    }
    out
}

fn split_name(path: &str) -> (String, String, String) {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    };
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
        _ => (name.clone(), String::new()),
    };
    (dir, stem, ext)
}

/// Expands the test-name templates for `path`, e.g. `{dir}/{stem}.test.{ext}`.
pub(crate) fn test_candidates(path: &str, variants: &[String]) -> Vec<String> {
    let (dir, stem, ext) = split_name(path);
    variants
        .iter()
        .map(|v| {
            let expanded = v
                .replace("{dir}", &dir)
                .replace("{stem}", &stem)
                .replace("{ext}", &ext);
            normalize_path(expanded.trim_start_matches('/'))
        })
        .collect()
}

/// `None` when the rule does not apply or a test exists; otherwise the first expected name.
fn missing_sibling_test(
    sibling: &SiblingTest,
    root: &Path,
    path: &str,
    staged_paths: &FxHashSet<&str>,
) -> Option<String> {
    if !sibling.applies_to.matches(path) || sibling.exclude.matches(path) {
        return None;
    }
    let candidates = test_candidates(path, &sibling.test_variants);
    let found = candidates
        .iter()
        .any(|c| staged_paths.contains(c.as_str()) || root.join(c).is_file());
    if found {
        None
    } else {
        candidates.into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActionHit {
    pub file: String,
    pub matched: String,
}

/// Dependency names declared by the manifests present at `root`, keyed by manifest file.
pub(crate) fn manifest_dependencies(root: &Path) -> Vec<(String, BTreeSet<String>)> {
    let mut out = Vec::new();

    let package_json = root.join("package.json");
    if package_json.is_file() {
        match fs::read_to_string(&package_json)
            .map_err(CohortError::from)
            .and_then(|raw| Ok(serde_json::from_str::<serde_json::Value>(&raw)?))
        {
            Ok(doc) => {
                let mut deps = BTreeSet::new();
                for table in ["dependencies", "devDependencies", "peerDependencies", "optionalDependencies"] {
                    if let Some(obj) = doc.get(table).and_then(|t| t.as_object()) {
                        deps.extend(obj.keys().cloned());
                    }
                }
                out.push(("package.json".to_string(), deps));
            }
            Err(e) => tracing::warn!(error = %e, "skipping unreadable package.json"),
        }
    }

    let cargo_toml = root.join("Cargo.toml");
    if cargo_toml.is_file() {
        match fs::read_to_string(&cargo_toml)
            .map_err(CohortError::from)
            .and_then(|raw| {
                raw.parse::<toml::Table>()
                    .map_err(|e| CohortError::ValidationError(e.to_string()))
            }) {
            Ok(doc) => {
                let mut deps = BTreeSet::new();
                for table in ["dependencies", "dev-dependencies", "build-dependencies"] {
                    if let Some(t) = doc.get(table).and_then(|t| t.as_table()) {
                        deps.extend(t.keys().cloned());
                    }
                }
                if let Some(t) = doc
                    .get("workspace")
                    .and_then(|w| w.get("dependencies"))
                    .and_then(|t| t.as_table())
                {
                    deps.extend(t.keys().cloned());
                }
                out.push(("Cargo.toml".to_string(), deps));
            }
            Err(e) => tracing::warn!(error = %e, "skipping unreadable Cargo.toml"),
        }
    }
    out
}

pub(crate) fn duplicate_groups(
    deps: &BTreeSet<String>,
    groups: &[DependencyGroup],
) -> Vec<(String, Vec<String>)> {
    groups
        .iter()
        .filter_map(|g| {
            let present: Vec<String> = g
                .packages
                .iter()
                .filter(|p| deps.contains(p.as_str()))
                .cloned()
                .collect();
            (present.len() >= 2).then(|| (g.purpose.clone(), present))
        })
        .collect()
}

pub(crate) fn run_action(groups: &[DependencyGroup], root: &Path) -> Vec<ActionHit> {
    let mut hits = Vec::new();
    for (manifest, deps) in manifest_dependencies(root) {
        for (purpose, present) in duplicate_groups(&deps, groups) {
            hits.push(ActionHit {
                file: manifest.clone(),
                matched: format!("{}: {}", purpose, present.join(", ")),
            });
        }
    }
    hits
}
