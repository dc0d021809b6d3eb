//! First-encounter tracking for policy rules.
//!
//! The first time a project trips a rule it is a new concept worth a full explanation; after
//! that it is a reminder. The marker is an idempotent upsert keyed by rule id, and each rule
//! counts once per evaluation call no matter how many files it fired on.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::time;
use crate::plugins::policy::PolicyResult;
use rusqlite::{OptionalExtension, params};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Novelty {
    NewConcept,
    Reminder,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Encounter {
    pub rule_id: String,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub count: i64,
}

fn row_to_encounter(row: &rusqlite::Row) -> Result<Encounter, rusqlite::Error> {
    Ok(Encounter {
        rule_id: row.get(0)?,
        first_seen_at: row.get(1)?,
        last_seen_at: row.get(2)?,
        count: row.get(3)?,
    })
}

/// Records one encounter per distinct rule in `results` and tags every result with its
/// novelty.
pub fn mark_encounters(db: &Datastore, results: &mut [PolicyResult]) -> Result<(), CohortError> {
    mark_encounters_at(db, results, time::now_millis())
}

pub fn mark_encounters_at(
    db: &Datastore,
    results: &mut [PolicyResult],
    now: i64,
) -> Result<(), CohortError> {
    if results.is_empty() {
        return Ok(());
    }
    let mut novelty: FxHashMap<String, Novelty> = FxHashMap::default();
    db.with_tx(|tx| {
        for result in results.iter() {
            if novelty.contains_key(&result.rule_id) {
                continue;
            }
            let seen: Option<i64> = tx
                .query_row(
                    "SELECT count FROM encounters WHERE rule_id = ?1",
                    params![result.rule_id],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "INSERT INTO encounters(rule_id, first_seen_at, last_seen_at, count)
                 VALUES(?1, ?2, ?2, 1)
                 ON CONFLICT(rule_id) DO UPDATE SET
                    count = count + 1,
                    last_seen_at = excluded.last_seen_at",
                params![result.rule_id, now],
            )?;
            let kind = if seen.is_some() {
                Novelty::Reminder
            } else {
                Novelty::NewConcept
            };
            novelty.insert(result.rule_id.clone(), kind);
        }
        Ok(())
    })?;

    for result in results.iter_mut() {
        result.novelty = novelty.get(&result.rule_id).copied();
    }
    Ok(())
}

pub fn get_encounter(db: &Datastore, rule_id: &str) -> Result<Option<Encounter>, CohortError> {
    Ok(db
        .conn()
        .query_row(
            "SELECT rule_id, first_seen_at, last_seen_at, count FROM encounters WHERE rule_id = ?1",
            params![rule_id],
            row_to_encounter,
        )
        .optional()?)
}

pub fn list_encounters(db: &Datastore) -> Result<Vec<Encounter>, CohortError> {
    let mut stmt = db.conn().prepare(
        "SELECT rule_id, first_seen_at, last_seen_at, count FROM encounters ORDER BY rule_id",
    )?;
    let rows = stmt.query_map([], row_to_encounter)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
