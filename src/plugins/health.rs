//! Health scorer: static repository signals rolled into category scores and a letter grade.
//!
//! The score is a pure function of the files on disk. Walks are sorted and all arithmetic is
//! integer, so an unchanged tree always produces the same scores, grade and input digest.
//! Each calculation is persisted twice: a row in `health_scores` for trend history and a
//! snapshot file for readers that do not want to open the datastore.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::policy::{self, ActionCheck, DependencyGroup, Detection};
use crate::plugins::policy_detect;
use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub(crate) const SKIP_DIRS: &[&str] = &[
    ".git",
    ".cohort",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".next",
    "__pycache__",
    ".venv",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "java", "kt", "rb", "swift", "c", "h",
    "cpp", "hpp", "cs", "php", "scala",
];

const LOCKFILES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "poetry.lock",
    "Pipfile.lock",
    "go.sum",
    "Gemfile.lock",
];

const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "Gemfile",
];

const LINT_CONFIGS: &[&str] = &[
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.json",
    ".eslintrc.cjs",
    "eslint.config.js",
    "eslint.config.mjs",
    ".prettierrc",
    "biome.json",
    "rustfmt.toml",
    ".rustfmt.toml",
    "clippy.toml",
    ".flake8",
    "ruff.toml",
    ".golangci.yml",
    ".editorconfig",
];

/// Files above this line count are "large" for the quality score.
const LARGE_FILE_LINES: usize = 500;
/// Files above this size are not read for content signals.
const MAX_SCANNED_BYTES: u64 = 1024 * 1024;

/// (name, weight). Weights sum to 100.
pub const CATEGORIES: &[(&str, u32)] = &[
    ("security", 25),
    ("testing", 20),
    ("quality", 20),
    ("documentation", 15),
    ("hygiene", 10),
    ("dependencies", 10),
];

const GRADE_CUTOFFS: &[(u32, &str)] = &[
    (97, "A+"),
    (93, "A"),
    (90, "A-"),
    (87, "B+"),
    (83, "B"),
    (80, "B-"),
    (77, "C+"),
    (73, "C"),
    (70, "C-"),
    (67, "D+"),
    (63, "D"),
    (60, "D-"),
];

/// Letter grade for an overall score.
pub fn grade_for(score: u32) -> &'static str {
    GRADE_CUTOFFS
        .iter()
        .find(|(cutoff, _)| score >= *cutoff)
        .map(|(_, grade)| *grade)
        .unwrap_or("F")
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CategoryScore {
    pub score: u32,
    pub weight: u32,
    pub findings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub project: String,
    pub timestamp: i64,
    pub overall_score: u32,
    pub grade: String,
    pub categories: BTreeMap<String, CategoryScore>,
    pub inputs_digest: String,
}

/// Everything the scorer looks at. Serialized to produce `inputs_digest`.
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct RepoSignals {
    pub source_files: usize,
    pub test_files: usize,
    pub source_lines: usize,
    pub large_files: Vec<String>,
    pub todo_markers: usize,
    pub secret_files: Vec<String>,
    pub env_files: Vec<String>,
    pub stray_files: Vec<String>,
    pub readme_bytes: Option<u64>,
    pub has_license: bool,
    pub has_contributing: bool,
    pub has_changelog: bool,
    pub docs_files: usize,
    pub has_gitignore: bool,
    pub gitignore_covers_env: bool,
    pub manifests: Vec<String>,
    pub lockfiles: Vec<String>,
    pub lint_configs: Vec<String>,
    pub has_ci: bool,
    pub dependency_count: usize,
    pub duplicate_groups: Vec<String>,
}

fn is_test_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    path.starts_with("tests/")
        || path.starts_with("test/")
        || path.contains("/tests/")
        || path.contains("/test/")
        || path.contains("__tests__/")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.starts_with("test_")
        || name.ends_with("_test.go")
        || name.ends_with("_test.py")
        || name.ends_with("_test.rs")
}

fn is_env_file(name: &str) -> bool {
    (name == ".env" || name.starts_with(".env."))
        && !matches!(name, ".env.example" | ".env.sample" | ".env.template")
}

fn is_stray(name: &str) -> bool {
    matches!(name, ".DS_Store" | "Thumbs.db" | "desktop.ini")
        || name.ends_with(".log")
        || name.ends_with(".swp")
        || name.ends_with(".orig")
        || name.ends_with(".rej")
}

fn secret_patterns() -> Vec<Regex> {
    [
        r#"(?i)(password|passwd|secret|api[_-]?key)\s*[:=]\s*['"][^'"]{4,}['"]"#,
        r"-----BEGIN (RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----",
        r"AKIA[0-9A-Z]{16}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

fn duplicate_purpose_groups() -> Vec<DependencyGroup> {
    policy::builtin_policies()
        .policies
        .into_iter()
        .flat_map(|p| p.rules)
        .filter_map(|r| match r.detection {
            Detection::Action(ActionCheck::DuplicateDeps { groups }) => Some(groups),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Walks the tree (sorted, skipping vendored and generated directories) and collects signals.
pub fn collect_signals(root: &Path) -> Result<RepoSignals, CohortError> {
    let mut signals = RepoSignals::default();
    let secrets = secret_patterns();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && SKIP_DIRS.iter().any(|d| e.file_name() == *d))
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable path during health scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let name = entry.file_name().to_string_lossy().to_string();
        let at_root = !rel.contains('/');

        if at_root {
            let upper = name.to_uppercase();
            if upper.starts_with("README") {
                signals.readme_bytes = entry.metadata().ok().map(|m| m.len());
            }
            if upper.starts_with("LICENSE") || upper.starts_with("LICENCE") {
                signals.has_license = true;
            }
            if upper.starts_with("CONTRIBUTING") {
                signals.has_contributing = true;
            }
            if upper.starts_with("CHANGELOG") {
                signals.has_changelog = true;
            }
            if name == ".gitignore" {
                signals.has_gitignore = true;
                let body = fs::read_to_string(entry.path()).unwrap_or_default();
                signals.gitignore_covers_env = body
                    .lines()
                    .map(str::trim)
                    .any(|l| matches!(l, ".env" | ".env*" | ".env.*" | "*.env" | "/.env"));
            }
            if MANIFESTS.contains(&name.as_str()) {
                signals.manifests.push(name.clone());
            }
            if LOCKFILES.contains(&name.as_str()) {
                signals.lockfiles.push(name.clone());
            }
        }
        if LINT_CONFIGS.contains(&name.as_str()) {
            signals.lint_configs.push(rel.clone());
        }
        if rel.starts_with(".github/workflows/")
            || rel == ".gitlab-ci.yml"
            || rel.starts_with(".circleci/")
            || rel == "Jenkinsfile"
        {
            signals.has_ci = true;
        }
        if rel.starts_with("docs/") {
            signals.docs_files += 1;
        }
        if is_env_file(&name) {
            signals.env_files.push(rel.clone());
        }
        if is_stray(&name) {
            signals.stray_files.push(rel.clone());
        }

        let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        if is_test_path(&rel) {
            signals.test_files += 1;
        } else {
            signals.source_files += 1;
        }
        if entry.metadata().map(|m| m.len() > MAX_SCANNED_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            tracing::warn!(path = %rel, "skipping unreadable file during health scan");
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let lines = text.lines().count();
        signals.source_lines += lines;
        if lines > LARGE_FILE_LINES {
            signals.large_files.push(rel.clone());
        }
        signals.todo_markers += text.matches("TODO").count() + text.matches("FIXME").count();
        if !is_test_path(&rel) && secrets.iter().any(|r| r.is_match(&text)) {
            signals.secret_files.push(rel.clone());
        }
    }

    let groups = duplicate_purpose_groups();
    for (manifest, deps) in policy_detect::manifest_dependencies(root) {
        signals.dependency_count += deps.len();
        for (purpose, present) in policy_detect::duplicate_groups(&deps, &groups) {
            signals
                .duplicate_groups
                .push(format!("{} in {}: {}", purpose, manifest, present.join(", ")));
        }
    }
    Ok(signals)
}

fn clamp(score: i64) -> u32 {
    score.clamp(0, 100) as u32
}

fn score_security(s: &RepoSignals) -> (u32, Vec<String>) {
    let mut score: i64 = 100;
    let mut findings = Vec::new();
    if !s.secret_files.is_empty() {
        score -= 25 * s.secret_files.len() as i64;
        findings.push(format!("possible secrets in {}", s.secret_files.join(", ")));
    }
    if !s.env_files.is_empty() {
        score -= 30;
        findings.push(format!("environment files present: {}", s.env_files.join(", ")));
    }
    if !s.gitignore_covers_env {
        score -= 10;
        findings.push(".gitignore does not exclude .env files".to_string());
    }
    (clamp(score), findings)
}

fn score_testing(s: &RepoSignals) -> (u32, Vec<String>) {
    if s.source_files == 0 {
        return (100, vec!["no source files to test".to_string()]);
    }
    let mut findings = vec![format!(
        "{} test file(s) for {} source file(s)",
        s.test_files, s.source_files
    )];
    let ratio_score = ((s.test_files * 170) / s.source_files).min(85) as i64;
    let mut score = ratio_score;
    if s.has_ci {
        score += 15;
    } else {
        findings.push("no CI configuration".to_string());
    }
    (clamp(score), findings)
}

fn score_quality(s: &RepoSignals) -> (u32, Vec<String>) {
    let mut score: i64 = 100;
    let mut findings = Vec::new();
    let total = (s.source_files + s.test_files).max(1);
    if !s.large_files.is_empty() {
        let pct = (s.large_files.len() * 100 / total) as i64;
        score -= (pct * 2).clamp(5, 40);
        findings.push(format!(
            "{} file(s) over {} lines",
            s.large_files.len(),
            LARGE_FILE_LINES
        ));
    }
    if s.todo_markers > 0 && s.source_lines > 0 {
        let per_kloc = (s.todo_markers * 1000 / s.source_lines) as i64;
        score -= (per_kloc * 2).min(30);
        findings.push(format!("{} TODO/FIXME marker(s)", s.todo_markers));
    }
    if s.lint_configs.is_empty() {
        score -= 15;
        findings.push("no lint or formatter configuration".to_string());
    }
    (clamp(score), findings)
}

fn score_documentation(s: &RepoSignals) -> (u32, Vec<String>) {
    let mut score: i64 = 0;
    let mut findings = Vec::new();
    match s.readme_bytes {
        Some(bytes) => {
            score += 40;
            if bytes >= 500 {
                score += 20;
            } else {
                findings.push("README is very short".to_string());
            }
        }
        None => findings.push("no README".to_string()),
    }
    if s.has_license {
        score += 15;
    } else {
        findings.push("no LICENSE".to_string());
    }
    if s.has_contributing {
        score += 10;
    }
    if s.has_changelog {
        score += 5;
    }
    if s.docs_files > 0 {
        score += 10;
    }
    (clamp(score), findings)
}

fn score_hygiene(s: &RepoSignals) -> (u32, Vec<String>) {
    let mut score: i64 = 0;
    let mut findings = Vec::new();
    if s.has_gitignore {
        score += 30;
    } else {
        findings.push("no .gitignore".to_string());
    }
    if s.manifests.is_empty() || !s.lockfiles.is_empty() {
        score += 25;
    } else {
        findings.push("dependency manifest without a lockfile".to_string());
    }
    let stray_penalty = (s.stray_files.len() as i64 * 5).min(25);
    score += 25 - stray_penalty;
    if !s.stray_files.is_empty() {
        findings.push(format!("stray files: {}", s.stray_files.join(", ")));
    }
    if s.has_ci {
        score += 20;
    }
    (clamp(score), findings)
}

fn score_dependencies(s: &RepoSignals) -> (u32, Vec<String>) {
    if s.manifests.is_empty() {
        return (100, vec!["no dependency manifest".to_string()]);
    }
    let mut score: i64 = 100;
    let mut findings = vec![format!("{} declared dependencies", s.dependency_count)];
    score -= 20 * s.duplicate_groups.len() as i64;
    findings.extend(s.duplicate_groups.iter().map(|g| format!("duplicate purpose: {}", g)));
    if s.lockfiles.is_empty() {
        score -= 10;
    }
    (clamp(score), findings)
}

/// Scores signals into categories. Pure: no I/O.
pub fn score_signals(signals: &RepoSignals) -> BTreeMap<String, CategoryScore> {
    let mut categories = BTreeMap::new();
    for (name, weight) in CATEGORIES {
        let (score, findings) = match *name {
            "security" => score_security(signals),
            "testing" => score_testing(signals),
            "quality" => score_quality(signals),
            "documentation" => score_documentation(signals),
            "hygiene" => score_hygiene(signals),
            _ => score_dependencies(signals),
        };
        categories.insert(
            name.to_string(),
            CategoryScore {
                score,
                weight: *weight,
                findings,
            },
        );
    }
    categories
}

/// Weighted average of category scores, rounded half up.
pub fn overall_score(categories: &BTreeMap<String, CategoryScore>) -> u32 {
    let total_weight: u32 = categories.values().map(|c| c.weight).sum();
    if total_weight == 0 {
        return 0;
    }
    let weighted: u32 = categories.values().map(|c| c.score * c.weight).sum();
    (weighted * 2 + total_weight) / (total_weight * 2)
}

fn digest(signals: &RepoSignals) -> Result<String, CohortError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(signals)?);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn calculate_health(root: &Path) -> Result<HealthReport, CohortError> {
    calculate_health_at(root, time::now_millis())
}

pub fn calculate_health_at(root: &Path, now: i64) -> Result<HealthReport, CohortError> {
    let signals = collect_signals(root)?;
    let categories = score_signals(&signals);
    let overall = overall_score(&categories);
    Ok(HealthReport {
        project: Store::new(root).project_name(),
        timestamp: now,
        overall_score: overall,
        grade: grade_for(overall).to_string(),
        categories,
        inputs_digest: digest(&signals)?,
    })
}

/// Appends a history row and atomically replaces the snapshot file.
pub fn record_health(
    db: &Datastore,
    store: &Store,
    report: &HealthReport,
) -> Result<(), CohortError> {
    db.conn().execute(
        "INSERT INTO health_scores(id, project, timestamp, overall_score, grade, categories, inputs_digest)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            time::new_id(),
            report.project,
            report.timestamp,
            report.overall_score,
            report.grade,
            serde_json::to_string(&report.categories)?,
            report.inputs_digest
        ],
    )?;

    let snapshot = store.snapshot_path();
    fs::create_dir_all(store.state_dir())?;
    let tmp = snapshot.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(report)?)?;
    fs::rename(&tmp, &snapshot)?;
    tracing::info!(score = report.overall_score, grade = %report.grade, "health recorded");
    Ok(())
}

/// Most recent history rows first.
pub fn health_history(db: &Datastore, limit: usize) -> Result<Vec<HealthReport>, CohortError> {
    let mut stmt = db.conn().prepare(
        "SELECT project, timestamp, overall_score, grade, categories, inputs_digest
         FROM health_scores ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let categories: String = row.get(4)?;
        let categories = serde_json::from_str(&categories).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(HealthReport {
            project: row.get(0)?,
            timestamp: row.get(1)?,
            overall_score: row.get(2)?,
            grade: row.get(3)?,
            categories,
            inputs_digest: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn read_snapshot(store: &Store) -> Result<HealthReport, CohortError> {
    let path = store.snapshot_path();
    if !path.exists() {
        return Err(CohortError::NotFound(format!(
            "health snapshot {} (run `cohort health calc`)",
            path.display()
        )));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "health",
        "version": "0.2.0",
        "description": "Deterministic repository health score and letter grade",
        "commands": [
            { "name": "calc" },
            { "name": "show" },
            { "name": "history", "parameters": ["limit?"] }
        ],
        "categories": CATEGORIES.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        "storage": ["cohort.db:health_scores", "health.json"]
    })
}
