use cohort::core::config::{ProjectConfig, StackConfig, Strictness};
use cohort::core::db::Datastore;
use cohort::core::store::Store;
use cohort::core::vcs::{ChangeKind, StaticChangeset};
use cohort::plugins::encounter::{self, Novelty};
use cohort::plugins::policy::{self, PolicyEngine, PolicyResult, Severity};
use std::fs;
use tempfile::tempdir;

const PASSWORD_POLICY: &str = r#"{
  "id": "local",
  "name": "Local",
  "version": "0.1.0",
  "rules": [
    {
      "id": "LOCAL-001",
      "name": "Password literal",
      "severity": "red",
      "description": "password assigned in source",
      "detection": { "mode": "pattern", "pattern": "password\\s*=\\s*['\"][^'\"]+['\"]" },
      "teaching": { "intermediate": "Use an environment variable." },
      "fix_suggestion": "Move it to the environment.",
      "auto_fixable": false
    }
  ]
}"#;

fn password_engine() -> PolicyEngine {
    let (policy, skipped) = policy::parse_policy_document("local.json", PASSWORD_POLICY).unwrap();
    assert!(skipped.is_empty());
    let (engine, skipped) = PolicyEngine::new(&[policy], &ProjectConfig::default());
    assert!(skipped.is_empty());
    engine
}

fn builtin_engine(config: &ProjectConfig) -> PolicyEngine {
    let report = policy::builtin_policies();
    assert!(report.skipped.is_empty(), "built-ins must parse: {:?}", report.skipped);
    PolicyEngine::new(&report.policies, config).0
}

fn rule_ids(results: &[PolicyResult]) -> Vec<&str> {
    let mut ids: Vec<&str> = results.iter().map(|r| r.rule_id.as_str()).collect();
    ids.sort();
    ids
}

fn result(severity: Severity) -> PolicyResult {
    PolicyResult {
        rule_id: format!("R-{}", severity),
        rule_name: "r".to_string(),
        policy_id: "p".to_string(),
        severity,
        file: None,
        line: None,
        matched: None,
        description: String::new(),
        teaching: String::new(),
        fix_suggestion: String::new(),
        auto_fixable: false,
        novelty: None,
    }
}

#[test]
fn test_password_rule_reports_single_line_one_hit() {
    let engine = password_engine();
    let results = engine.check_file("src/db.ts", "const password = \"hunter2\";\n");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line, Some(1));
    assert!(results[0].matched.as_deref().unwrap().contains("password"));
    assert_eq!(results[0].severity, Severity::Red);
    assert_eq!(results[0].teaching, "Use an environment variable.");
}

#[test]
fn test_only_first_matching_line_per_regex() {
    let engine = password_engine();
    let content = "let a = 1;\npassword = 'one'\npassword = 'two'\n";
    let results = engine.check_file("app.py", content);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line, Some(2));
}

#[test]
fn test_enforcement_by_strictness() {
    let yellow = vec![result(Severity::Yellow)];
    assert!(policy::enforce(&yellow, Strictness::Strict).is_blocked());
    assert!(!policy::enforce(&yellow, Strictness::Moderate).is_blocked());

    let everything = vec![result(Severity::Red), result(Severity::Yellow), result(Severity::Green)];
    assert!(!policy::enforce(&everything, Strictness::Permissive).is_blocked());
    assert_eq!(policy::enforce(&everything, Strictness::Moderate).blocking.len(), 1);
    assert_eq!(policy::enforce(&everything, Strictness::Strict).blocking.len(), 2);
}

#[test]
fn test_staged_changeset_against_builtins() {
    let tmp = tempdir().unwrap();
    let engine = builtin_engine(&ProjectConfig::default());
    let big = vec![b'x'; 1024 * 1024 + 1];
    let changeset = StaticChangeset::new()
        .stage(".env", ChangeKind::Added, "DB_PASSWORD=secret\n")
        .stage(".env.example", ChangeKind::Added, "DB_PASSWORD=\n")
        .stage("assets/video.bin", ChangeKind::Added, big)
        .stage("src/merge.rs", ChangeKind::Modified, "fn a() {}\n<<<<<<< HEAD\n")
        .stage("src/gone.rs", ChangeKind::Deleted, "password = \"x\"\n");

    let results = engine.check_staged(tmp.path(), &changeset).unwrap();
    assert_eq!(rule_ids(&results), vec!["GIT-001", "GIT-002", "GIT-003"]);

    let env = results.iter().find(|r| r.rule_id == "GIT-001").unwrap();
    assert_eq!(env.file.as_deref(), Some(".env"));
    let size = results.iter().find(|r| r.rule_id == "GIT-002").unwrap();
    assert_eq!(size.matched.as_deref(), Some("1025 KB"));
    let conflict = results.iter().find(|r| r.rule_id == "GIT-003").unwrap();
    assert_eq!(conflict.line, Some(2));
}

#[test]
fn test_ui_import_respects_declared_stack() {
    let config = ProjectConfig {
        stack: StackConfig {
            ui: vec!["@radix-ui".to_string()],
        },
        ..ProjectConfig::default()
    };
    let engine = builtin_engine(&config);

    let own = engine.check_file("src/Dialog.tsx", "import * as D from '@radix-ui/react-dialog';\n");
    assert!(own.iter().all(|r| r.rule_id != "CONV-002"));

    let foreign = engine.check_file("src/Table.tsx", "import { Table } from 'antd';\n");
    assert!(foreign.iter().any(|r| r.rule_id == "CONV-002"));
}

#[test]
fn test_new_route_needs_sibling_test() {
    let tmp = tempdir().unwrap();
    let engine = builtin_engine(&ProjectConfig::default());

    let untested = StaticChangeset::new().stage("src/routes/users.ts", ChangeKind::Added, "export {}\n");
    let results = engine.check_staged(tmp.path(), &untested).unwrap();
    assert!(results.iter().any(|r| r.rule_id == "CONV-001"));

    let tested = StaticChangeset::new()
        .stage("src/routes/users.ts", ChangeKind::Added, "export {}\n")
        .stage("src/routes/users.test.ts", ChangeKind::Added, "test('x', () => {})\n");
    let results = engine.check_staged(tmp.path(), &tested).unwrap();
    assert!(results.iter().all(|r| r.rule_id != "CONV-001"));

    // Modified routes are not held to the rule.
    let modified = StaticChangeset::new().stage("src/routes/users.ts", ChangeKind::Modified, "export {}\n");
    let results = engine.check_staged(tmp.path(), &modified).unwrap();
    assert!(results.iter().all(|r| r.rule_id != "CONV-001"));
}

#[test]
fn test_duplicate_dependencies_flagged_once() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join("package.json"),
        r#"{ "dependencies": { "axios": "1.0.0", "got": "12.0.0" }, "devDependencies": { "jest": "29" } }"#,
    )
    .unwrap();
    let engine = builtin_engine(&ProjectConfig::default());
    let results = engine.check_repository(tmp.path());
    let dups: Vec<&PolicyResult> = results.iter().filter(|r| r.rule_id == "DEP-001").collect();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].file.as_deref(), Some("package.json"));
    assert!(dups[0].matched.as_deref().unwrap().contains("axios"));
}

#[test]
fn test_project_policies_skip_malformed_documents() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    fs::create_dir_all(store.policies_dir()).unwrap();
    fs::write(store.policies_dir().join("a-local.json"), PASSWORD_POLICY).unwrap();
    fs::write(store.policies_dir().join("b-broken.json"), "{ not json").unwrap();

    let report = policy::load_project_policies(&store).unwrap();
    assert_eq!(report.policies.len(), 1);
    assert_eq!(report.policies[0].id, "local");
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].rule_id.is_none());
}

#[test]
fn test_install_builtin_policies_then_load() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let written = policy::install_builtin_policies(&store).unwrap();
    assert_eq!(written.len(), 4);
    assert!(policy::install_builtin_policies(&store).unwrap().is_empty());

    let report = policy::load_project_policies(&store).unwrap();
    assert_eq!(report.policies.len(), 4);
}

#[test]
fn test_encounters_mark_new_then_reminder() {
    let tmp = tempdir().unwrap();
    let db = Datastore::initialize(&Store::new(tmp.path())).unwrap();
    let engine = password_engine();

    let mut first = engine.check_file("a.ts", "password = 'x'\n");
    first.extend(engine.check_file("b.ts", "password = 'y'\n"));
    encounter::mark_encounters_at(&db, &mut first, 1_000).unwrap();
    assert!(first.iter().all(|r| r.novelty == Some(Novelty::NewConcept)));

    let mut second = engine.check_file("c.ts", "password = 'z'\n");
    encounter::mark_encounters_at(&db, &mut second, 2_000).unwrap();
    assert_eq!(second[0].novelty, Some(Novelty::Reminder));

    let seen = encounter::get_encounter(&db, "LOCAL-001").unwrap().unwrap();
    assert_eq!(seen.count, 2);
    assert_eq!(seen.first_seen_at, 1_000);
    assert_eq!(seen.last_seen_at, 2_000);
}

#[test]
fn test_out_of_range_size_rule_is_skipped_not_fatal() {
    let doc = r#"{
      "id": "mixed",
      "name": "Mixed",
      "version": "0.1.0",
      "rules": [
        {
          "id": "MIX-001",
          "name": "Huge blob",
          "severity": "red",
          "description": "blob too large",
          "detection": { "mode": "git-hook", "check": "size", "max_kb": 18446744073709551615 },
          "fix_suggestion": "Use LFS."
        },
        {
          "id": "MIX-002",
          "name": "Password literal",
          "severity": "red",
          "description": "password assigned in source",
          "detection": { "mode": "pattern", "pattern": "password\\s*=\\s*['\"][^'\"]+['\"]" },
          "fix_suggestion": "Move it to the environment."
        }
      ]
    }"#;
    let (policy, skipped) = policy::parse_policy_document("mixed.json", doc).unwrap();
    assert!(skipped.is_empty());

    let (engine, skipped) = PolicyEngine::new(&[policy], &ProjectConfig::default());
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].rule_id.as_deref(), Some("MIX-001"));

    let results = engine.check_file("src/db.ts", "const password = \"hunter2\";\n");
    assert_eq!(rule_ids(&results), vec!["MIX-002"]);
}
