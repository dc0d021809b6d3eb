use cohort::core::db::Datastore;
use cohort::core::error::CohortError;
use cohort::core::store::Store;
use cohort::plugins::bulletin::{self, NewBulletinEntry, entry_types};
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Datastore) {
    let tmp = tempdir().unwrap();
    let db = Datastore::initialize(&Store::new(tmp.path())).unwrap();
    (tmp, db)
}

#[test]
fn test_post_then_recent_returns_entry() {
    let (_tmp, db) = setup();
    let posted = bulletin::post_bulletin(
        &db,
        &NewBulletinEntry::new(entry_types::NOTE, "switching to the API layer")
            .agent("claude")
            .files(vec!["src/api/mod.rs".to_string()])
            .warning("src/api is soft-claimed"),
    )
    .unwrap();

    let recent = bulletin::get_recent_bulletin(&db, 1).unwrap();
    assert_eq!(recent, vec![posted]);
    assert_eq!(recent[0].files.as_ref().unwrap(), &vec!["src/api/mod.rs".to_string()]);
}

#[test]
fn test_recent_is_newest_first_and_limited() {
    let (_tmp, db) = setup();
    for (i, ts) in [100, 200, 300, 400].iter().enumerate() {
        bulletin::post_bulletin_at(&db, &NewBulletinEntry::new(entry_types::NOTE, format!("n{}", i)), *ts)
            .unwrap();
    }
    let recent = bulletin::get_recent_bulletin(&db, 2).unwrap();
    let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["n3", "n2"]);
}

#[test]
fn test_since_excludes_boundary_and_ascends() {
    let (_tmp, db) = setup();
    for (msg, ts) in [("a", 100), ("b", 200), ("c", 300)] {
        bulletin::post_bulletin_at(&db, &NewBulletinEntry::new(entry_types::NOTE, msg), ts).unwrap();
    }
    let since: Vec<String> = bulletin::get_bulletin_since(&db, 200)
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(since, vec!["c"]);

    let all = bulletin::get_bulletin_since(&db, 0).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[test]
fn test_timestamp_ties_keep_insertion_order() {
    let (_tmp, db) = setup();
    bulletin::post_bulletin_at(&db, &NewBulletinEntry::new(entry_types::NOTE, "first"), 500).unwrap();
    bulletin::post_bulletin_at(&db, &NewBulletinEntry::new(entry_types::NOTE, "second"), 500).unwrap();

    let recent = bulletin::get_recent_bulletin(&db, 2).unwrap();
    assert_eq!(recent[0].message, "second");
    let since = bulletin::get_bulletin_since(&db, 0).unwrap();
    assert_eq!(since[0].message, "first");
}

#[test]
fn test_empty_entry_type_rejected() {
    let (_tmp, db) = setup();
    assert!(matches!(
        bulletin::post_bulletin(&db, &NewBulletinEntry::new("", "x")),
        Err(CohortError::ValidationError(_))
    ));
}
