//! Claim ledger: advisory glob-pattern ownership.
//!
//! A claim says "this session intends to work on files matching this pattern". Nothing stops
//! another process from editing a claimed file; the ledger only supports detection and
//! warning.
//!
//! Lookup is a linear scan of active claims, newest first, and the first match wins. A broad
//! claim created after a narrow one therefore shadows it. Precedence is by recency, not by
//! pattern specificity.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::glob;
use crate::core::time;
use crate::plugins::bulletin::{self, NewBulletinEntry, entry_types};
use crate::plugins::session::{self, SessionStatus};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    #[default]
    Soft,
    Hard,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimType::Soft => "soft",
            ClaimType::Hard => "hard",
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimType {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soft" => Ok(ClaimType::Soft),
            "hard" => Ok(ClaimType::Hard),
            other => Err(CohortError::ValidationError(format!(
                "unknown claim type '{}' (expected soft or hard)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claim {
    pub id: String,
    pub session_id: String,
    pub pattern: String,
    pub claim_type: ClaimType,
    pub created_at: i64,
    pub released_at: Option<i64>,
}

/// An unreleased claim together with the owning session's agent.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ActiveClaim {
    pub id: String,
    pub session_id: String,
    pub agent: String,
    pub pattern: String,
    pub claim_type: ClaimType,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClaimStatus {
    Unclaimed,
    Claimed(ActiveClaim),
}

/// Classification of a claim collision. A warning to surface, never an error.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConflictWarning {
    pub path: String,
    pub held_by: ActiveClaim,
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {}-claimed by {} ({}) via '{}'",
            self.path,
            self.held_by.claim_type,
            self.held_by.agent,
            self.held_by.session_id,
            self.held_by.pattern
        )
    }
}

impl ClaimStatus {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimStatus::Claimed(_))
    }

    /// A conflict exists when the matching claim belongs to some other session.
    pub fn conflict_for(&self, path: &str, session_id: Option<&str>) -> Option<ConflictWarning> {
        match self {
            ClaimStatus::Claimed(claim) if Some(claim.session_id.as_str()) != session_id => {
                Some(ConflictWarning {
                    path: glob::normalize_path(path),
                    held_by: claim.clone(),
                })
            }
            _ => None,
        }
    }
}

fn parse_claim_type(raw: String, idx: usize) -> Result<ClaimType, rusqlite::Error> {
    raw.parse::<ClaimType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Claims `pattern` for the session, replacing any earlier row for the same pattern so the
/// claim gets a fresh id and `created_at`.
pub fn create_claim(
    db: &Datastore,
    session_id: &str,
    pattern: &str,
    claim_type: ClaimType,
) -> Result<Claim, CohortError> {
    create_claim_at(db, session_id, pattern, claim_type, time::now_millis())
}

pub fn create_claim_at(
    db: &Datastore,
    session_id: &str,
    pattern: &str,
    claim_type: ClaimType,
    now: i64,
) -> Result<Claim, CohortError> {
    let owner = session::get_session(db, session_id)?;
    if owner.status == SessionStatus::Ended {
        return Err(CohortError::ValidationError(format!(
            "session {} has ended; start a new session to claim files",
            session_id
        )));
    }
    let pattern = glob::normalize_path(pattern.trim());
    if pattern.is_empty() {
        return Err(CohortError::ValidationError(
            "claim pattern must not be empty".to_string(),
        ));
    }
    glob::compile(&pattern)?;

    let claim = Claim {
        id: time::new_id(),
        session_id: session_id.to_string(),
        pattern,
        claim_type,
        created_at: now,
        released_at: None,
    };

    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM claims WHERE session_id = ?1 AND pattern = ?2",
            params![claim.session_id, claim.pattern],
        )?;
        tx.execute(
            "INSERT INTO claims(id, session_id, pattern, claim_type, created_at, released_at)
             VALUES(?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                claim.id,
                claim.session_id,
                claim.pattern,
                claim.claim_type.as_str(),
                claim.created_at
            ],
        )?;
        bulletin::insert_entry(
            tx,
            &NewBulletinEntry::new(
                entry_types::CLAIM,
                format!("{} claimed {} ({})", owner.agent, claim.pattern, claim.claim_type),
            )
            .session(session_id)
            .agent(&owner.agent)
            .files(vec![claim.pattern.clone()]),
            now,
        )?;
        Ok(())
    })?;

    tracing::info!(session = %session_id, pattern = %claim.pattern, "claim created");
    Ok(claim)
}

/// Releases one pattern, or every active claim of the session when `pattern` is `None`.
/// Returns how many claims were released.
pub fn release_claim(
    db: &Datastore,
    session_id: &str,
    pattern: Option<&str>,
) -> Result<usize, CohortError> {
    release_claim_at(db, session_id, pattern, time::now_millis())
}

pub fn release_claim_at(
    db: &Datastore,
    session_id: &str,
    pattern: Option<&str>,
    now: i64,
) -> Result<usize, CohortError> {
    let owner = session::get_session(db, session_id)?;
    let pattern = pattern.map(|p| glob::normalize_path(p.trim()));

    let released = db.with_tx(|tx| {
        let released = match &pattern {
            Some(p) => tx.execute(
                "UPDATE claims SET released_at = ?1
                 WHERE session_id = ?2 AND pattern = ?3 AND released_at IS NULL",
                params![now, session_id, p],
            )?,
            None => tx.execute(
                "UPDATE claims SET released_at = ?1 WHERE session_id = ?2 AND released_at IS NULL",
                params![now, session_id],
            )?,
        };
        if released > 0 {
            let what = pattern
                .clone()
                .unwrap_or_else(|| format!("all {} claim(s)", released));
            bulletin::insert_entry(
                tx,
                &NewBulletinEntry::new(
                    entry_types::RELEASE,
                    format!("{} released {}", owner.agent, what),
                )
                .session(session_id)
                .agent(&owner.agent),
                now,
            )?;
        }
        Ok(released)
    })?;

    if released == 0 {
        tracing::debug!(session = %session_id, ?pattern, "nothing to release");
    }
    Ok(released)
}

const ACTIVE_CLAIMS_SQL: &str = "
    SELECT c.id, c.session_id, s.agent, c.pattern, c.claim_type, c.created_at
    FROM claims c JOIN sessions s ON s.id = c.session_id
    WHERE c.released_at IS NULL";

fn row_to_active_claim(row: &rusqlite::Row) -> Result<ActiveClaim, rusqlite::Error> {
    Ok(ActiveClaim {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent: row.get(2)?,
        pattern: row.get(3)?,
        claim_type: parse_claim_type(row.get(4)?, 4)?,
        created_at: row.get(5)?,
    })
}

/// Every unreleased claim, newest first.
pub fn list_active_claims(db: &Datastore) -> Result<Vec<ActiveClaim>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "{} ORDER BY c.created_at DESC, c.rowid DESC",
        ACTIVE_CLAIMS_SQL
    ))?;
    let rows = stmt.query_map([], row_to_active_claim)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn list_session_claims(
    db: &Datastore,
    session_id: &str,
) -> Result<Vec<ActiveClaim>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "{} AND c.session_id = ?1 ORDER BY c.created_at DESC, c.rowid DESC",
        ACTIVE_CLAIMS_SQL
    ))?;
    let rows = stmt.query_map(params![session_id], row_to_active_claim)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Resolves which claim, if any, covers `path`. First match in newest-first order wins.
pub fn check_file(db: &Datastore, path: &str) -> Result<ClaimStatus, CohortError> {
    let claims = list_active_claims(db)?;
    Ok(resolve(&claims, path))
}

/// Pure lookup over an already-ordered claim list. Claims whose stored pattern no longer
/// compiles are skipped.
pub fn resolve(claims: &[ActiveClaim], path: &str) -> ClaimStatus {
    let path = glob::normalize_path(path);
    for claim in claims {
        match glob::compile(&claim.pattern) {
            Ok(matcher) if matcher.is_match(&path) => {
                return ClaimStatus::Claimed(claim.clone());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(claim = %claim.id, error = %e, "skipping unusable claim pattern"),
        }
    }
    ClaimStatus::Unclaimed
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "claim",
        "version": "0.1.0",
        "description": "Advisory glob-pattern claims with most-recent-wins lookup",
        "commands": [
            { "name": "add", "parameters": ["session", "pattern", "type?"] },
            { "name": "release", "parameters": ["session", "pattern?"] },
            { "name": "list" },
            { "name": "check", "parameters": ["path"] }
        ],
        "storage": ["cohort.db:claims"]
    })
}
