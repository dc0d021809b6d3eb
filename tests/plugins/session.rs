use cohort::core::db::Datastore;
use cohort::core::error::CohortError;
use cohort::core::store::Store;
use cohort::core::time::MILLIS_PER_MINUTE;
use cohort::plugins::bulletin::{self, entry_types};
use cohort::plugins::claim::{self, ClaimType};
use cohort::plugins::session::{self, SessionStatus};
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Datastore) {
    let tmp = tempdir().unwrap();
    let db = Datastore::initialize(&Store::new(tmp.path())).unwrap();
    (tmp, db)
}

#[test]
fn test_register_posts_session_start() {
    let (_tmp, db) = setup();
    let s = session::register_session_at(&db, "claude", Some(4242), Some("fix auth"), 1_000).unwrap();

    assert_eq!(s.status, SessionStatus::Active);
    assert_eq!(s.started_at, 1_000);
    assert_eq!(s.last_activity_at, 1_000);
    assert_eq!(s.pid, Some(4242));

    let recent = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(recent[0].entry_type, entry_types::SESSION_START);
    assert_eq!(recent[0].session_id.as_deref(), Some(s.id.as_str()));
}

#[test]
fn test_register_rejects_empty_agent() {
    let (_tmp, db) = setup();
    let err = session::register_session(&db, "  ", None, None).unwrap_err();
    assert!(matches!(err, CohortError::ValidationError(_)));
}

#[test]
fn test_end_session_excludes_session_and_its_claims() {
    let (_tmp, db) = setup();
    let a = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    let b = session::register_session_at(&db, "codex", None, None, 1_000).unwrap();
    claim::create_claim_at(&db, &a.id, "src/auth/**", ClaimType::Hard, 1_100).unwrap();
    claim::create_claim_at(&db, &b.id, "docs/**", ClaimType::Soft, 1_100).unwrap();

    session::end_session_at(&db, &a.id, 2_000).unwrap();

    let active: Vec<String> = session::list_active_sessions(&db)
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(active, vec![b.id.clone()]);

    let claims = claim::list_active_claims(&db).unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].session_id, b.id);

    let ended = session::get_session(&db, &a.id).unwrap();
    assert_eq!(ended.status, SessionStatus::Ended);
    assert_eq!(ended.ended_at, Some(2_000));

    let last = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(last[0].entry_type, entry_types::SESSION_END);
    assert!(last[0].message.contains("released 1 claim"));
}

#[test]
fn test_end_session_is_idempotent() {
    let (_tmp, db) = setup();
    let s = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    session::end_session_at(&db, &s.id, 2_000).unwrap();
    session::end_session_at(&db, &s.id, 3_000).unwrap();

    assert_eq!(session::get_session(&db, &s.id).unwrap().ended_at, Some(2_000));
    let ends = bulletin::get_bulletin_since(&db, 0)
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == entry_types::SESSION_END)
        .count();
    assert_eq!(ends, 1);
}

#[test]
fn test_touch_ended_session_fails() {
    let (_tmp, db) = setup();
    let s = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    session::end_session_at(&db, &s.id, 2_000).unwrap();
    assert!(matches!(
        session::touch_session_at(&db, &s.id, 3_000),
        Err(CohortError::ValidationError(_))
    ));
}

#[test]
fn test_touch_unknown_session_is_not_found() {
    let (_tmp, db) = setup();
    assert!(matches!(
        session::touch_session(&db, "01NOPE"),
        Err(CohortError::NotFound(_))
    ));
}

#[test]
fn test_touch_revives_idle_session() {
    let (_tmp, db) = setup();
    let s = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    session::idle_session(&db, &s.id).unwrap();
    assert!(session::list_active_sessions(&db).unwrap().is_empty());

    session::touch_session_at(&db, &s.id, 5_000).unwrap();
    let s = session::get_session(&db, &s.id).unwrap();
    assert_eq!(s.status, SessionStatus::Active);
    assert_eq!(s.last_activity_at, 5_000);
}

#[test]
fn test_stale_sweep_reclaims_only_expired_leases() {
    let (_tmp, db) = setup();
    let now = 100 * MILLIS_PER_MINUTE;
    let quiet = session::register_session_at(&db, "claude", None, None, now - 61 * MILLIS_PER_MINUTE).unwrap();
    let busy = session::register_session_at(&db, "codex", None, None, now - 90 * MILLIS_PER_MINUTE).unwrap();
    session::touch_session_at(&db, &busy.id, now - 5 * MILLIS_PER_MINUTE).unwrap();
    claim::create_claim_at(&db, &quiet.id, "src/**", ClaimType::Soft, now - 61 * MILLIS_PER_MINUTE).unwrap();

    let reclaimed = session::cleanup_stale_sessions_at(&db, 30, now).unwrap();
    assert_eq!(reclaimed, 1);

    assert_eq!(session::get_session(&db, &quiet.id).unwrap().status, SessionStatus::Ended);
    assert_eq!(session::get_session(&db, &busy.id).unwrap().status, SessionStatus::Active);
    assert!(claim::list_session_claims(&db, &quiet.id).unwrap().is_empty());

    let last = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(last[0].entry_type, entry_types::SESSION_STALE);

    // A second sweep at the same instant finds nothing.
    assert_eq!(session::cleanup_stale_sessions_at(&db, 30, now).unwrap(), 0);
}

#[test]
fn test_stale_cutoff_is_strict() {
    let (_tmp, db) = setup();
    let now = 100 * MILLIS_PER_MINUTE;
    let s = session::register_session_at(&db, "claude", None, None, now - 30 * MILLIS_PER_MINUTE).unwrap();
    assert_eq!(session::cleanup_stale_sessions_at(&db, 30, now).unwrap(), 0);
    assert_eq!(session::get_session(&db, &s.id).unwrap().status, SessionStatus::Active);
}

#[test]
fn test_sessions_visible_across_handles() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let first = Datastore::initialize(&store).unwrap();
    let second = Datastore::open(&store).unwrap();

    let s = session::register_session(&first, "claude", None, None).unwrap();
    let seen = session::list_active_sessions(&second).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, s.id);
}

#[test]
fn test_idle_session_keeps_claims_and_survives_sweep() {
    let (_tmp, db) = setup();
    let now = 100 * MILLIS_PER_MINUTE;
    let s = session::register_session_at(&db, "claude", None, None, now - 90 * MILLIS_PER_MINUTE).unwrap();
    claim::create_claim_at(&db, &s.id, "src/auth/**", ClaimType::Hard, now - 90 * MILLIS_PER_MINUTE).unwrap();
    session::idle_session(&db, &s.id).unwrap();

    assert_eq!(session::cleanup_stale_sessions_at(&db, 30, now).unwrap(), 0);
    assert_eq!(session::get_session(&db, &s.id).unwrap().status, SessionStatus::Idle);
    assert_eq!(claim::list_session_claims(&db, &s.id).unwrap().len(), 1);
}

#[test]
fn test_sweep_rejects_non_positive_window() {
    let (_tmp, db) = setup();
    let s = session::register_session(&db, "claude", None, None).unwrap();
    claim::create_claim(&db, &s.id, "src/**", ClaimType::Soft).unwrap();

    for minutes in [0, -1] {
        assert!(matches!(
            session::cleanup_stale_sessions(&db, minutes),
            Err(CohortError::ValidationError(_))
        ));
    }
    assert_eq!(session::get_session(&db, &s.id).unwrap().status, SessionStatus::Active);
    assert_eq!(claim::list_session_claims(&db, &s.id).unwrap().len(), 1);
}

#[test]
fn test_sweep_with_huge_window_reclaims_nothing() {
    let (_tmp, db) = setup();
    let s = session::register_session_at(&db, "claude", None, None, 1_000).unwrap();
    assert_eq!(session::cleanup_stale_sessions(&db, i64::MAX).unwrap(), 0);
    assert_eq!(session::get_session(&db, &s.id).unwrap().status, SessionStatus::Active);
}

#[test]
fn test_lease_renewed_after_candidate_read_survives() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let sweeper = Datastore::initialize(&store).unwrap();
    let agent = Datastore::open(&store).unwrap();
    let now = 100 * MILLIS_PER_MINUTE;

    let s = session::register_session_at(&agent, "claude", None, None, now - 61 * MILLIS_PER_MINUTE).unwrap();
    claim::create_claim_at(&agent, &s.id, "src/**", ClaimType::Hard, now - 61 * MILLIS_PER_MINUTE).unwrap();

    let cutoff = session::stale_cutoff(30, now).unwrap();
    let candidates = session::stale_candidates(&sweeper, cutoff).unwrap();
    assert_eq!(candidates.len(), 1);

    session::touch_session_at(&agent, &s.id, now - MILLIS_PER_MINUTE).unwrap();
    assert!(!session::reclaim_stale_session(&sweeper, &candidates[0], cutoff, now).unwrap());

    assert_eq!(session::get_session(&agent, &s.id).unwrap().status, SessionStatus::Active);
    assert_eq!(claim::list_session_claims(&agent, &s.id).unwrap().len(), 1);
    let stale = bulletin::get_bulletin_since(&agent, 0)
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == entry_types::SESSION_STALE)
        .count();
    assert_eq!(stale, 0);
}

#[test]
fn test_concurrent_sweeps_reclaim_once() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let first = Datastore::initialize(&store).unwrap();
    let second = Datastore::open(&store).unwrap();
    let now = 100 * MILLIS_PER_MINUTE;
    session::register_session_at(&first, "claude", None, None, now - 61 * MILLIS_PER_MINUTE).unwrap();

    let cutoff = session::stale_cutoff(30, now).unwrap();
    let seen_first = session::stale_candidates(&first, cutoff).unwrap();
    let seen_second = session::stale_candidates(&second, cutoff).unwrap();
    assert_eq!(seen_first.len(), 1);
    assert_eq!(seen_second.len(), 1);

    assert!(session::reclaim_stale_session(&first, &seen_first[0], cutoff, now).unwrap());
    assert!(!session::reclaim_stale_session(&second, &seen_second[0], cutoff, now).unwrap());
    assert_eq!(session::cleanup_stale_sessions_at(&second, 30, now).unwrap(), 0);

    let stale = bulletin::get_bulletin_since(&second, 0)
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == entry_types::SESSION_STALE)
        .count();
    assert_eq!(stale, 1);
}
