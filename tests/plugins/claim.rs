use cohort::core::db::Datastore;
use cohort::core::error::CohortError;
use cohort::core::store::Store;
use cohort::plugins::bulletin::{self, entry_types};
use cohort::plugins::claim::{self, ClaimStatus, ClaimType};
use cohort::plugins::session;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Datastore) {
    let tmp = tempdir().unwrap();
    let db = Datastore::initialize(&Store::new(tmp.path())).unwrap();
    (tmp, db)
}

#[test]
fn test_most_recent_claim_wins_on_overlap() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    let b = session::register_session_at(&db, "codex", None, None, 1_000).unwrap();

    // Broad claim made later beats the narrow one made earlier.
    claim::create_claim_at(&db, &a.id, "src/auth/**", ClaimType::Hard, 2_000).unwrap();
    claim::create_claim_at(&db, &b.id, "src/**", ClaimType::Soft, 3_000).unwrap();

    match claim::check_file(&db, "src/auth/login.ts").unwrap() {
        ClaimStatus::Claimed(c) => {
            assert_eq!(c.session_id, b.id);
            assert_eq!(c.agent, "codex");
            assert_eq!(c.pattern, "src/**");
        }
        ClaimStatus::Unclaimed => panic!("expected a claim"),
    }
}

#[test]
fn test_reclaiming_same_pattern_refreshes_recency() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    let b = session::register_session_at(&db, "codex", None, None, 1_000).unwrap();
    let first = claim::create_claim_at(&db, &a.id, "src/**", ClaimType::Soft, 2_000).unwrap();
    claim::create_claim_at(&db, &b.id, "src/*.rs", ClaimType::Soft, 3_000).unwrap();
    let again = claim::create_claim_at(&db, &a.id, "src/**", ClaimType::Hard, 4_000).unwrap();

    assert_ne!(first.id, again.id);
    assert_eq!(claim::list_session_claims(&db, &a.id).unwrap().len(), 1);
    let status = claim::check_file(&db, "src/lib.rs").unwrap();
    match status {
        ClaimStatus::Claimed(c) => {
            assert_eq!(c.session_id, a.id);
            assert_eq!(c.claim_type, ClaimType::Hard);
        }
        ClaimStatus::Unclaimed => panic!("expected a claim"),
    }
}

#[test]
fn test_unmatched_path_is_unclaimed() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    claim::create_claim_at(&db, &a.id, "src/**", ClaimType::Soft, 2_000).unwrap();
    assert_eq!(claim::check_file(&db, "README.md").unwrap(), ClaimStatus::Unclaimed);
}

#[test]
fn test_conflict_only_for_other_sessions() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    let b = session::register_session_at(&db, "codex", None, None, 1_000).unwrap();
    claim::create_claim_at(&db, &a.id, "src/**", ClaimType::Hard, 2_000).unwrap();

    let status = claim::check_file(&db, "./src/main.rs").unwrap();
    assert!(status.conflict_for("src/main.rs", Some(&a.id)).is_none());
    let warning = status.conflict_for("src/main.rs", Some(&b.id)).unwrap();
    assert_eq!(warning.held_by.agent, "claude");
    assert!(warning.to_string().contains("hard-claimed by claude"));
}

#[test]
fn test_release_single_pattern_and_all() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    claim::create_claim_at(&db, &a.id, "src/**", ClaimType::Soft, 2_000).unwrap();
    claim::create_claim_at(&db, &a.id, "docs/**", ClaimType::Soft, 2_000).unwrap();
    claim::create_claim_at(&db, &a.id, "tests/**", ClaimType::Soft, 2_000).unwrap();

    assert_eq!(claim::release_claim_at(&db, &a.id, Some("docs/**"), 3_000).unwrap(), 1);
    assert_eq!(claim::list_session_claims(&db, &a.id).unwrap().len(), 2);
    assert_eq!(claim::release_claim_at(&db, &a.id, None, 4_000).unwrap(), 2);
    assert!(claim::list_active_claims(&db).unwrap().is_empty());
    assert_eq!(claim::release_claim_at(&db, &a.id, None, 5_000).unwrap(), 0);

    let last = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(last[0].entry_type, entry_types::RELEASE);
}

#[test]
fn test_claim_requires_live_session() {
    let (_tmp, db) = setup();
    assert!(matches!(
        claim::create_claim(&db, "01MISSING", "src/**", ClaimType::Soft),
        Err(CohortError::NotFound(_))
    ));

    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    session::end_session_at(&db, &a.id, 2_000).unwrap();
    assert!(matches!(
        claim::create_claim(&db, &a.id, "src/**", ClaimType::Soft),
        Err(CohortError::ValidationError(_))
    ));
}

#[test]
fn test_invalid_glob_rejected() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    assert!(matches!(
        claim::create_claim(&db, &a.id, "src/[unclosed", ClaimType::Soft),
        Err(CohortError::ValidationError(_))
    ));
    assert!(claim::list_active_claims(&db).unwrap().is_empty());
}

#[test]
fn test_claim_posts_bulletin_entry() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    claim::create_claim_at(&db, &a.id, "src/api/", ClaimType::Soft, 2_000).unwrap();

    let last = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(last[0].entry_type, entry_types::CLAIM);
    assert_eq!(last[0].agent.as_deref(), Some("claude"));
    // Trailing slash claims cover the whole directory.
    assert!(claim::check_file(&db, "src/api/users/get.ts").unwrap().is_claimed());
}
