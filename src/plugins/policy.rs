//! Policy rule engine: declarative, severity-tagged classifiers over files and diffs.
//!
//! Policies are JSON documents (one per governance area) holding rules. Each rule picks exactly
//! one detection mode: `pattern`, `git-hook`, `heuristic` or `action`. The engine only
//! classifies; severities are data. Deciding what blocks a commit is the caller's job via
//! [`enforce`], so one result stream can drive interactive output, a blocking hook and teaching
//! text at once.
//!
//! Loading is partial-failure tolerant: a malformed rule or unreadable document is logged and
//! skipped, never disabling the rest of governance.

use crate::core::config::{ExperienceLevel, ProjectConfig, Strictness};
use crate::core::error::CohortError;
use crate::core::store::Store;
use crate::core::vcs::Changeset;
use crate::plugins::encounter::Novelty;
use crate::plugins::policy_detect::{self, CompiledDetection};
use rayon::prelude::*;
use rust_embed::RustEmbed;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Green => "green",
            Severity::Yellow => "yellow",
            Severity::Red => "red",
        };
        f.write_str(s)
    }
}

impl Strictness {
    /// Severities that must block a commit at this strictness.
    pub fn blocking_severities(self) -> &'static [Severity] {
        match self {
            Strictness::Permissive => &[],
            Strictness::Moderate => &[Severity::Red],
            Strictness::Strict => &[Severity::Red, Severity::Yellow],
        }
    }

    pub fn blocks(self, severity: Severity) -> bool {
        self.blocking_severities().contains(&severity)
    }
}

/// Teaching text per experience level. Any level may be omitted.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Teaching {
    #[serde(default)]
    pub beginner: Option<String>,
    #[serde(default)]
    pub intermediate: Option<String>,
    #[serde(default)]
    pub expert: Option<String>,
}

impl Teaching {
    /// Picks the requested level, falling back to intermediate, beginner, expert, then
    /// `fallback`.
    pub fn resolve(&self, level: ExperienceLevel, fallback: &str) -> String {
        let preferred = match level {
            ExperienceLevel::Beginner => &self.beginner,
            ExperienceLevel::Intermediate => &self.intermediate,
            ExperienceLevel::Expert => &self.expert,
        };
        preferred
            .as_ref()
            .or(self.intermediate.as_ref())
            .or(self.beginner.as_ref())
            .or(self.expert.as_ref())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PatternContext {
    /// Discard matches that name a package from the project's declared UI stack.
    UiImport,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PatternSpec {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub context: Option<PatternContext>,
}

impl PatternSpec {
    pub fn all_patterns(&self) -> Vec<String> {
        self.pattern
            .iter()
            .chain(self.patterns.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "check", rename_all = "kebab-case")]
pub enum GitHookCheck {
    /// A staged path matches a sensitive glob.
    Path {
        globs: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// A staged blob is larger than `max_kb`.
    Size {
        max_kb: u64,
        #[serde(default)]
        file_types: Vec<String>,
    },
    /// A regex matches inside staged content.
    Content(PatternSpec),
}

fn default_test_variants() -> Vec<String> {
    vec![
        "{dir}/{stem}.test.{ext}".to_string(),
        "{dir}/{stem}.spec.{ext}".to_string(),
        "{dir}/__tests__/{stem}.test.{ext}".to_string(),
        "{dir}/__tests__/{stem}.spec.{ext}".to_string(),
        "{dir}/test_{stem}.{ext}".to_string(),
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "check", rename_all = "kebab-case")]
pub enum HeuristicCheck {
    /// A newly added file matching `applies_to` needs a test at one of `test_variants`.
    SiblingTest {
        applies_to: Vec<String>,
        #[serde(default = "default_test_variants")]
        test_variants: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    pub purpose: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "check", rename_all = "kebab-case")]
pub enum ActionCheck {
    /// The manifest lists two or more packages from one group.
    DuplicateDeps { groups: Vec<DependencyGroup> },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Detection {
    Pattern(PatternSpec),
    GitHook(GitHookCheck),
    Heuristic(HeuristicCheck),
    Action(ActionCheck),
}

impl Detection {
    pub fn mode(&self) -> &'static str {
        match self {
            Detection::Pattern(_) => "pattern",
            Detection::GitHook(_) => "git-hook",
            Detection::Heuristic(_) => "heuristic",
            Detection::Action(_) => "action",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    pub detection: Detection,
    #[serde(default)]
    pub teaching: Teaching,
    #[serde(default)]
    pub fix_suggestion: String,
    #[serde(default)]
    pub auto_fixable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PolicyRule>,
}

/// Document shape before rule validation: rules stay raw so one bad rule can be skipped.
#[derive(Debug, Deserialize)]
struct RawPolicyDocument {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SkippedRule {
    pub source: String,
    pub rule_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub policies: Vec<Policy>,
    pub skipped: Vec<SkippedRule>,
}

/// One finding. Ephemeral: produced per evaluation, never stored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub rule_id: String,
    pub rule_name: String,
    pub policy_id: String,
    pub severity: Severity,
    pub file: Option<String>,
    pub line: Option<usize>,
    #[serde(rename = "match")]
    pub matched: Option<String>,
    pub description: String,
    pub teaching: String,
    pub fix_suggestion: String,
    pub auto_fixable: bool,
    #[serde(default)]
    pub novelty: Option<Novelty>,
}

#[derive(RustEmbed)]
#[folder = "policies/"]
#[include = "*.json"]
struct BuiltinPolicies;

/// Parses one document. A document that is not valid JSON or lacks its header is an error;
/// individual rules that fail to parse are reported as skipped.
pub fn parse_policy_document(
    source: &str,
    raw: &str,
) -> Result<(Policy, Vec<SkippedRule>), CohortError> {
    let doc: RawPolicyDocument = serde_json::from_str(raw)
        .map_err(|e| CohortError::ValidationError(format!("{}: {}", source, e)))?;
    let mut rules = Vec::new();
    let mut skipped = Vec::new();
    for value in doc.rules {
        let rule_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        match serde_json::from_value::<PolicyRule>(value) {
            Ok(rule) => rules.push(rule),
            Err(e) => {
                tracing::warn!(source, rule = ?rule_id, error = %e, "skipping malformed policy rule");
                skipped.push(SkippedRule {
                    source: source.to_string(),
                    rule_id,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((
        Policy {
            id: doc.id,
            name: doc.name,
            version: doc.version,
            description: doc.description,
            rules,
        },
        skipped,
    ))
}

fn absorb(report: &mut LoadReport, source: &str, raw: &str) {
    match parse_policy_document(source, raw) {
        Ok((policy, skipped)) => {
            report.policies.push(policy);
            report.skipped.extend(skipped);
        }
        Err(e) => {
            tracing::warn!(source, error = %e, "skipping unreadable policy document");
            report.skipped.push(SkippedRule {
                source: source.to_string(),
                rule_id: None,
                reason: e.to_string(),
            });
        }
    }
}

/// Policy documents compiled into the binary.
pub fn builtin_policies() -> LoadReport {
    let mut names: Vec<String> = BuiltinPolicies::iter().map(|n| n.to_string()).collect();
    names.sort();
    let mut report = LoadReport::default();
    for name in names {
        let Some(file) = BuiltinPolicies::get(&name) else {
            continue;
        };
        let raw = String::from_utf8_lossy(&file.data);
        absorb(&mut report, &format!("builtin:{}", name), &raw);
    }
    report
}

/// Loads every `*.json` document in `dir`, in file-name order.
pub fn load_policies(dir: &Path) -> Result<LoadReport, CohortError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut report = LoadReport::default();
    for path in paths {
        let source = path.display().to_string();
        match fs::read_to_string(&path) {
            Ok(raw) => absorb(&mut report, &source, &raw),
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "skipping unreadable policy document");
                report.skipped.push(SkippedRule {
                    source,
                    rule_id: None,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// The project's policies directory when present, the built-in set otherwise.
pub fn load_project_policies(store: &Store) -> Result<LoadReport, CohortError> {
    let dir = store.policies_dir();
    if dir.is_dir() {
        load_policies(&dir)
    } else {
        Ok(builtin_policies())
    }
}

/// Writes the built-in documents into the project's policies directory so they can be edited.
/// Existing files are left alone. Returns the paths written.
pub fn install_builtin_policies(store: &Store) -> Result<Vec<PathBuf>, CohortError> {
    let dir = store.policies_dir();
    fs::create_dir_all(&dir)?;
    let mut written = Vec::new();
    let mut names: Vec<String> = BuiltinPolicies::iter().map(|n| n.to_string()).collect();
    names.sort();
    for name in names {
        let target = dir.join(&name);
        if target.exists() {
            continue;
        }
        if let Some(file) = BuiltinPolicies::get(&name) {
            fs::write(&target, file.data.as_ref())?;
            written.push(target);
        }
    }
    Ok(written)
}

pub struct CompiledRule {
    pub policy_id: String,
    pub rule: PolicyRule,
    pub(crate) detection: CompiledDetection,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RuleSummary {
    pub policy_id: String,
    pub rule_id: String,
    pub name: String,
    pub severity: Severity,
    pub mode: String,
    pub description: String,
}

/// Compiled rules plus the project context they evaluate in.
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
    experience: ExperienceLevel,
    ui_stack: Vec<String>,
}

impl PolicyEngine {
    /// Compiles every rule. Rules with invalid regexes or globs are skipped and returned.
    pub fn new(policies: &[Policy], config: &ProjectConfig) -> (Self, Vec<SkippedRule>) {
        let mut rules = Vec::new();
        let mut skipped = Vec::new();
        for policy in policies {
            for rule in &policy.rules {
                match policy_detect::compile(&rule.detection) {
                    Ok(detection) => rules.push(CompiledRule {
                        policy_id: policy.id.clone(),
                        rule: rule.clone(),
                        detection,
                    }),
                    Err(e) => {
                        tracing::warn!(policy = %policy.id, rule = %rule.id, error = %e, "skipping rule that failed to compile");
                        skipped.push(SkippedRule {
                            source: policy.id.clone(),
                            rule_id: Some(rule.id.clone()),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        let engine = Self {
            rules,
            experience: config.experience_level,
            ui_stack: config.stack.ui.iter().map(|s| s.to_lowercase()).collect(),
        };
        (engine, skipped)
    }

    /// Loads the project's policies and compiles them, returning everything that was skipped.
    pub fn for_project(
        store: &Store,
        config: &ProjectConfig,
    ) -> Result<(Self, Vec<SkippedRule>), CohortError> {
        let report = load_project_policies(store)?;
        let (engine, mut skipped) = Self::new(&report.policies, config);
        let mut all = report.skipped;
        all.append(&mut skipped);
        Ok((engine, all))
    }

    pub fn list_rules(&self) -> Vec<RuleSummary> {
        self.rules
            .iter()
            .map(|r| RuleSummary {
                policy_id: r.policy_id.clone(),
                rule_id: r.rule.id.clone(),
                name: r.rule.name.clone(),
                severity: r.rule.severity,
                mode: r.rule.detection.mode().to_string(),
                description: r.rule.description.clone(),
            })
            .collect()
    }

    pub(crate) fn ui_stack(&self) -> &[String] {
        &self.ui_stack
    }

    pub(crate) fn make_result(
        &self,
        rule: &CompiledRule,
        file: Option<&str>,
        line: Option<usize>,
        matched: Option<String>,
    ) -> PolicyResult {
        PolicyResult {
            rule_id: rule.rule.id.clone(),
            rule_name: rule.rule.name.clone(),
            policy_id: rule.policy_id.clone(),
            severity: rule.rule.severity,
            file: file.map(|f| f.to_string()),
            line,
            matched,
            description: rule.rule.description.clone(),
            teaching: rule
                .rule
                .teaching
                .resolve(self.experience, &rule.rule.description),
            fix_suggestion: rule.rule.fix_suggestion.clone(),
            auto_fixable: rule.rule.auto_fixable,
            novelty: None,
        }
    }

    /// Runs every `pattern` rule against one file's content.
    pub fn check_file(&self, path: &str, content: &str) -> Vec<PolicyResult> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if let CompiledDetection::Pattern(pattern) = &rule.detection {
                tracing::debug!(rule = %rule.rule.id, path, "pattern check");
                for hit in policy_detect::scan_pattern(pattern, path, content, self.ui_stack()) {
                    out.push(self.make_result(rule, Some(path), Some(hit.line), Some(hit.matched)));
                }
            }
        }
        dedup_results(out)
    }

    /// Reads `rel_path` under `root` and runs [`check_file`](Self::check_file).
    pub fn check_path(&self, root: &Path, rel_path: &str) -> Result<Vec<PolicyResult>, CohortError> {
        let bytes = fs::read(root.join(rel_path))?;
        Ok(self.check_file(rel_path, &String::from_utf8_lossy(&bytes)))
    }

    /// Checks many files in parallel. Unreadable files are logged and skipped.
    pub fn check_paths(&self, root: &Path, rel_paths: &[String]) -> Vec<PolicyResult> {
        let per_file: Vec<Vec<PolicyResult>> = rel_paths
            .par_iter()
            .map(|p| match self.check_path(root, p) {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(path = %p, error = %e, "skipping unreadable file");
                    Vec::new()
                }
            })
            .collect();
        dedup_results(per_file.into_iter().flatten().collect())
    }

    /// Evaluates the staged changeset: pattern and git-hook rules on each staged file,
    /// heuristics on added files, and whole-repository action rules.
    pub fn check_staged(
        &self,
        root: &Path,
        changeset: &dyn Changeset,
    ) -> Result<Vec<PolicyResult>, CohortError> {
        let staged = changeset.staged_files()?;
        let staged_paths: FxHashSet<&str> = staged.iter().map(|f| f.path.as_str()).collect();

        let per_file: Vec<Vec<PolicyResult>> = staged
            .par_iter()
            .map(|file| policy_detect::check_staged_file(self, &self.rules, root, changeset, file, &staged_paths))
            .collect();

        let mut out: Vec<PolicyResult> = per_file.into_iter().flatten().collect();
        out.extend(self.check_repository(root));
        Ok(dedup_results(out))
    }

    /// Runs whole-repository `action` rules.
    pub fn check_repository(&self, root: &Path) -> Vec<PolicyResult> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if let CompiledDetection::Action(action) = &rule.detection {
                for hit in policy_detect::run_action(action, root) {
                    out.push(self.make_result(rule, Some(&hit.file), None, Some(hit.matched)));
                }
            }
        }
        dedup_results(out)
    }
}

/// Keeps the first result for each (rule_id, file) pair, preserving order.
pub fn dedup_results(results: Vec<PolicyResult>) -> Vec<PolicyResult> {
    let mut seen: FxHashSet<(String, Option<String>)> = FxHashSet::default();
    results
        .into_iter()
        .filter(|r| seen.insert((r.rule_id.clone(), r.file.clone())))
        .collect()
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Enforcement {
    pub strictness: Strictness,
    pub blocking: Vec<PolicyResult>,
}

impl Enforcement {
    pub fn is_blocked(&self) -> bool {
        !self.blocking.is_empty()
    }
}

/// Applies a strictness level to a result set. This is where classification becomes
/// enforcement; the engine itself never blocks.
pub fn enforce(results: &[PolicyResult], strictness: Strictness) -> Enforcement {
    Enforcement {
        strictness,
        blocking: results
            .iter()
            .filter(|r| strictness.blocks(r.severity))
            .cloned()
            .collect(),
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "policy",
        "version": "0.2.0",
        "description": "Declarative severity-tagged policy rules with caller-side enforcement",
        "commands": [
            { "name": "list" },
            { "name": "check", "parameters": ["file*", "staged?", "enforce?"] }
        ],
        "modes": ["pattern", "git-hook", "heuristic", "action"],
        "storage": [".cohort/policies/*.json", "cohort.db:encounters"]
    })
}
