use cohort::core::db::Datastore;
use cohort::core::error::CohortError;
use cohort::core::store::Store;
use cohort::plugins::health::{self, grade_for};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn sample_repo(root: &Path) {
    write(root, "README.md", &"A small service that does one thing well.\n".repeat(20));
    write(root, "LICENSE", "MIT");
    write(root, ".gitignore", "target/\n.env\n");
    write(root, "Cargo.toml", "[package]\nname = \"svc\"\n\n[dependencies]\nserde = \"1\"\n");
    write(root, "Cargo.lock", "# lock\n");
    write(root, "rustfmt.toml", "edition = \"2024\"\n");
    write(root, "src/main.rs", "fn main() {}\n");
    write(root, "src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n");
    write(root, "tests/add.rs", "#[test]\nfn adds() {}\n");
}

#[test]
fn test_calculate_is_deterministic() {
    let tmp = tempdir().unwrap();
    sample_repo(tmp.path());

    let first = health::calculate_health_at(tmp.path(), 1_000).unwrap();
    let second = health::calculate_health_at(tmp.path(), 2_000).unwrap();
    assert_eq!(first.overall_score, second.overall_score);
    assert_eq!(first.grade, second.grade);
    assert_eq!(first.inputs_digest, second.inputs_digest);
    assert_eq!(first.categories, second.categories);
    assert_eq!(first.grade, grade_for(first.overall_score));
    assert_eq!(first.categories.len(), health::CATEGORIES.len());
}

#[test]
fn test_committed_env_file_lowers_security() {
    let tmp = tempdir().unwrap();
    sample_repo(tmp.path());
    let clean = health::calculate_health(tmp.path()).unwrap();

    write(tmp.path(), ".env", "DB_PASSWORD=hunter2\n");
    let dirty = health::calculate_health(tmp.path()).unwrap();
    assert!(dirty.categories["security"].score < clean.categories["security"].score);
    assert_ne!(dirty.inputs_digest, clean.inputs_digest);
}

#[test]
fn test_state_and_vendored_dirs_are_ignored() {
    let tmp = tempdir().unwrap();
    sample_repo(tmp.path());
    let before = health::calculate_health(tmp.path()).unwrap();

    write(tmp.path(), "node_modules/pkg/index.js", "const password = 'x';\n");
    write(tmp.path(), "target/debug/build.log", "noise\n");
    let store = Store::new(tmp.path());
    Datastore::initialize(&store).unwrap();

    let after = health::calculate_health(tmp.path()).unwrap();
    assert_eq!(before.inputs_digest, after.inputs_digest);
}

#[test]
fn test_duplicate_dependencies_lower_dependency_score() {
    let tmp = tempdir().unwrap();
    write(
        tmp.path(),
        "package.json",
        r#"{ "dependencies": { "moment": "2", "dayjs": "1" } }"#,
    );
    let report = health::calculate_health(tmp.path()).unwrap();
    let deps = &report.categories["dependencies"];
    assert!(deps.score <= 80);
    assert!(deps.findings.iter().any(|f| f.contains("date handling")));
}

#[test]
fn test_record_writes_history_and_snapshot() {
    let tmp = tempdir().unwrap();
    sample_repo(tmp.path());
    let store = Store::new(tmp.path());
    let db = Datastore::initialize(&store).unwrap();

    assert!(matches!(health::read_snapshot(&store), Err(CohortError::NotFound(_))));

    let older = health::calculate_health_at(tmp.path(), 1_000).unwrap();
    health::record_health(&db, &store, &older).unwrap();
    let newer = health::calculate_health_at(tmp.path(), 2_000).unwrap();
    health::record_health(&db, &store, &newer).unwrap();

    let history = health::health_history(&db, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp, 2_000);
    assert_eq!(history[1].timestamp, 1_000);
    assert_eq!(history[0].categories, newer.categories);

    let snapshot = health::read_snapshot(&store).unwrap();
    assert_eq!(snapshot, newer);
    assert!(!store.snapshot_path().with_extension("json.tmp").exists());
}
