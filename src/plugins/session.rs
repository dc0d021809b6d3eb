//! Session registry: who is working in this repository right now.
//!
//! A session is a lease. Callers renew it with [`touch_session`]; one that goes quiet for
//! longer than the stale window is ended by whichever process next runs
//! [`cleanup_stale_sessions`]. There is no background timer, so reclamation latency is bounded
//! by how often agents invoke Cohort, not by wall-clock precision.
//!
//! Every transition posts to the bulletin so the activity log stays the single timeline.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::time::{self, MILLIS_PER_MINUTE};
use crate::plugins::bulletin::{self, NewBulletinEntry, entry_types};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Ended,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(CohortError::ValidationError(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub agent: String,
    pub pid: Option<i64>,
    pub intent: Option<String>,
    pub status: SessionStatus,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub ended_at: Option<i64>,
}

const SESSION_COLUMNS: &str =
    "id, agent, pid, intent, status, started_at, last_activity_at, ended_at";

fn row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
    let status: String = row.get(4)?;
    let status = status.parse::<SessionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Session {
        id: row.get(0)?,
        agent: row.get(1)?,
        pid: row.get(2)?,
        intent: row.get(3)?,
        status,
        started_at: row.get(5)?,
        last_activity_at: row.get(6)?,
        ended_at: row.get(7)?,
    })
}

pub fn register_session(
    db: &Datastore,
    agent: &str,
    pid: Option<i64>,
    intent: Option<&str>,
) -> Result<Session, CohortError> {
    register_session_at(db, agent, pid, intent, time::now_millis())
}

pub fn register_session_at(
    db: &Datastore,
    agent: &str,
    pid: Option<i64>,
    intent: Option<&str>,
    now: i64,
) -> Result<Session, CohortError> {
    if agent.trim().is_empty() {
        return Err(CohortError::ValidationError(
            "agent name must not be empty".to_string(),
        ));
    }
    let session = Session {
        id: time::new_id(),
        agent: agent.to_string(),
        pid,
        intent: intent.map(|s| s.to_string()),
        status: SessionStatus::Active,
        started_at: now,
        last_activity_at: now,
        ended_at: None,
    };

    db.with_tx(|tx| {
        tx.execute(
            "INSERT INTO sessions(id, agent, pid, intent, status, started_at, last_activity_at, ended_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            params![
                session.id,
                session.agent,
                session.pid,
                session.intent,
                session.status.as_str(),
                session.started_at,
                session.last_activity_at
            ],
        )?;
        let message = match &session.intent {
            Some(intent) => format!("{} started a session: {}", session.agent, intent),
            None => format!("{} started a session", session.agent),
        };
        bulletin::insert_entry(
            tx,
            &NewBulletinEntry::new(entry_types::SESSION_START, message)
                .session(&session.id)
                .agent(&session.agent),
            now,
        )?;
        Ok(())
    })?;

    tracing::info!(session = %session.id, agent = %session.agent, "session registered");
    Ok(session)
}

pub fn get_session(db: &Datastore, id: &str) -> Result<Session, CohortError> {
    db.conn()
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            params![id],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| CohortError::NotFound(format!("session {}", id)))
}

/// Renews the lease. An idle session becomes active again; an ended one cannot be revived.
pub fn touch_session(db: &Datastore, id: &str) -> Result<(), CohortError> {
    touch_session_at(db, id, time::now_millis())
}

pub fn touch_session_at(db: &Datastore, id: &str, now: i64) -> Result<(), CohortError> {
    let session = get_session(db, id)?;
    if session.status == SessionStatus::Ended {
        return Err(CohortError::ValidationError(format!(
            "session {} has ended and cannot be renewed",
            id
        )));
    }
    db.conn().execute(
        "UPDATE sessions SET last_activity_at = ?1, status = 'active' WHERE id = ?2 AND status != 'ended'",
        params![now, id],
    )?;
    Ok(())
}

/// Marks an active session idle. Idle sessions hold their claims but are neither listed as
/// active nor swept as stale.
pub fn idle_session(db: &Datastore, id: &str) -> Result<(), CohortError> {
    let session = get_session(db, id)?;
    if session.status == SessionStatus::Ended {
        return Err(CohortError::ValidationError(format!(
            "session {} has ended",
            id
        )));
    }
    db.conn().execute(
        "UPDATE sessions SET status = 'idle' WHERE id = ?1 AND status = 'active'",
        params![id],
    )?;
    Ok(())
}

/// Ends the session and releases all of its claims. Ending an ended session is a no-op.
pub fn end_session(db: &Datastore, id: &str) -> Result<(), CohortError> {
    end_session_at(db, id, time::now_millis())
}

pub fn end_session_at(db: &Datastore, id: &str, now: i64) -> Result<(), CohortError> {
    let session = get_session(db, id)?;
    if session.status == SessionStatus::Ended {
        return Ok(());
    }
    let released = db.with_tx(|tx| {
        end_in_tx(
            tx,
            &session,
            now,
            None,
            entry_types::SESSION_END,
            format!("{} ended a session", session.agent),
        )
    })?;
    match released {
        Some(released) => tracing::info!(session = %id, released, "session ended"),
        None => tracing::debug!(session = %id, "session already ended elsewhere"),
    }
    Ok(())
}

/// Ends the session if it is still eligible, then releases its claims and posts `entry_type`.
/// With a `cutoff`, only an active session whose last activity is older than the cutoff
/// qualifies, so a lease renewed after the caller's read is left alone. Returns `None` when the
/// update matched no row.
fn end_in_tx(
    tx: &rusqlite::Transaction<'_>,
    session: &Session,
    now: i64,
    cutoff: Option<i64>,
    entry_type: &str,
    message: String,
) -> Result<Option<usize>, CohortError> {
    let ended = match cutoff {
        Some(cutoff) => tx.execute(
            "UPDATE sessions SET status = 'ended', ended_at = ?1
             WHERE id = ?2 AND status = 'active' AND last_activity_at < ?3",
            params![now, session.id, cutoff],
        )?,
        None => tx.execute(
            "UPDATE sessions SET status = 'ended', ended_at = ?1 WHERE id = ?2 AND status != 'ended'",
            params![now, session.id],
        )?,
    };
    if ended == 0 {
        return Ok(None);
    }
    let released = tx.execute(
        "UPDATE claims SET released_at = ?1 WHERE session_id = ?2 AND released_at IS NULL",
        params![now, session.id],
    )?;
    let message = if released > 0 {
        format!("{} (released {} claim(s))", message, released)
    } else {
        message
    };
    bulletin::insert_entry(
        tx,
        &NewBulletinEntry::new(entry_type, message)
            .session(&session.id)
            .agent(&session.agent),
        now,
    )?;
    Ok(Some(released))
}

pub fn list_active_sessions(db: &Datastore) -> Result<Vec<Session>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {} FROM sessions WHERE status = 'active' ORDER BY started_at DESC, rowid DESC",
        SESSION_COLUMNS
    ))?;
    let rows = stmt.query_map([], row_to_session)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Ends every active session whose lease ran out, cascading claim release.
pub fn cleanup_stale_sessions(db: &Datastore, stale_minutes: i64) -> Result<usize, CohortError> {
    cleanup_stale_sessions_at(db, stale_minutes, time::now_millis())
}

pub fn cleanup_stale_sessions_at(
    db: &Datastore,
    stale_minutes: i64,
    now: i64,
) -> Result<usize, CohortError> {
    let cutoff = stale_cutoff(stale_minutes, now)?;
    let mut reclaimed = 0;
    for session in stale_candidates(db, cutoff)? {
        if reclaim_stale_session(db, &session, cutoff, now)? {
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}

/// Activity timestamp a lease must beat to survive a sweep at `now`.
pub fn stale_cutoff(stale_minutes: i64, now: i64) -> Result<i64, CohortError> {
    if stale_minutes <= 0 {
        return Err(CohortError::ValidationError(format!(
            "stale window must be a positive number of minutes, got {}",
            stale_minutes
        )));
    }
    Ok(stale_minutes
        .checked_mul(MILLIS_PER_MINUTE)
        .map_or(i64::MIN, |window| now.saturating_sub(window)))
}

/// Active sessions last seen before `cutoff`. The read is advisory; each end re-checks.
pub fn stale_candidates(db: &Datastore, cutoff: i64) -> Result<Vec<Session>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {} FROM sessions WHERE status = 'active' AND last_activity_at < ?1
         ORDER BY last_activity_at, rowid",
        SESSION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![cutoff], row_to_session)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Ends `session` as stale if it is still active and still older than `cutoff`.
/// Returns false when another process renewed or ended it first.
pub fn reclaim_stale_session(
    db: &Datastore,
    session: &Session,
    cutoff: i64,
    now: i64,
) -> Result<bool, CohortError> {
    let idle_for = time::format_age(session.last_activity_at, now);
    let ended = db.with_tx(|tx| {
        end_in_tx(
            tx,
            session,
            now,
            Some(cutoff),
            entry_types::SESSION_STALE,
            format!(
                "{}'s session reclaimed after {} without activity",
                session.agent, idle_for
            ),
        )
    })?;
    match ended {
        Some(released) => {
            tracing::info!(session = %session.id, agent = %session.agent, released, "stale session reclaimed");
            Ok(true)
        }
        None => {
            tracing::debug!(session = %session.id, "stale candidate renewed or ended elsewhere");
            Ok(false)
        }
    }
}

/// Opportunistic sweep run before session-aware operations. Failures are logged and left for
/// the next invocation to retry.
pub fn sweep_stale(db: &Datastore, stale_minutes: i64) -> usize {
    match cleanup_stale_sessions(db, stale_minutes) {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "stale session sweep failed; will retry next invocation");
            0
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "session",
        "version": "0.1.0",
        "description": "Session registry with timestamp-checked leases",
        "commands": [
            { "name": "start", "parameters": ["agent", "pid?", "intent?"] },
            { "name": "touch", "parameters": ["id"] },
            { "name": "idle", "parameters": ["id"] },
            { "name": "end", "parameters": ["id"] },
            { "name": "list" },
            { "name": "sweep", "parameters": ["stale_minutes?"] }
        ],
        "storage": ["cohort.db:sessions"]
    })
}
