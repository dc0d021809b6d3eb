//! Bulletin: the append-only activity feed every process writes to.
//!
//! Rows are never updated or deleted. Readers catch up with [`get_bulletin_since`] using the
//! last timestamp they saw; there is no server-side cursor.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::time;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Entry types posted by Cohort itself. External writers may use any other string.
pub mod entry_types {
    pub const SESSION_START: &str = "session_start";
    pub const SESSION_END: &str = "session_end";
    pub const SESSION_STALE: &str = "session_stale";
    pub const CLAIM: &str = "claim";
    pub const RELEASE: &str = "release";
    pub const FILE_CHANGE: &str = "file_change";
    pub const COMMIT: &str = "commit";
    pub const POLICY: &str = "policy";
    pub const HEALTH: &str = "health";
    pub const NOTE: &str = "note";
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BulletinEntry {
    pub id: String,
    pub session_id: Option<String>,
    pub agent: Option<String>,
    pub entry_type: String,
    pub message: String,
    pub files: Option<Vec<String>>,
    pub warning: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBulletinEntry {
    pub session_id: Option<String>,
    pub agent: Option<String>,
    pub entry_type: String,
    pub message: String,
    pub files: Option<Vec<String>>,
    pub warning: Option<String>,
}

impl NewBulletinEntry {
    pub fn new(entry_type: &str, message: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Inserts one row on an existing connection or transaction. Lifecycle operations call this
/// inside their own transaction so the state change and its bulletin line commit together.
pub(crate) fn insert_entry(
    conn: &Connection,
    entry: &NewBulletinEntry,
    now: i64,
) -> Result<BulletinEntry, CohortError> {
    if entry.entry_type.trim().is_empty() {
        return Err(CohortError::ValidationError(
            "bulletin entry type must not be empty".to_string(),
        ));
    }
    let files_json = entry
        .files
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let stored = BulletinEntry {
        id: time::new_id(),
        session_id: entry.session_id.clone(),
        agent: entry.agent.clone(),
        entry_type: entry.entry_type.clone(),
        message: entry.message.clone(),
        files: entry.files.clone(),
        warning: entry.warning.clone(),
        created_at: now,
    };
    conn.execute(
        "INSERT INTO bulletin(id, session_id, agent, entry_type, message, files, warning, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            stored.id,
            stored.session_id,
            stored.agent,
            stored.entry_type,
            stored.message,
            files_json,
            stored.warning,
            stored.created_at
        ],
    )?;
    Ok(stored)
}

pub fn post_bulletin(db: &Datastore, entry: &NewBulletinEntry) -> Result<BulletinEntry, CohortError> {
    post_bulletin_at(db, entry, time::now_millis())
}

pub fn post_bulletin_at(
    db: &Datastore,
    entry: &NewBulletinEntry,
    now: i64,
) -> Result<BulletinEntry, CohortError> {
    insert_entry(db.conn(), entry, now)
}

fn row_to_entry(row: &rusqlite::Row) -> Result<BulletinEntry, rusqlite::Error> {
    let files: Option<String> = row.get(5)?;
    let files = files
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(BulletinEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent: row.get(2)?,
        entry_type: row.get(3)?,
        message: row.get(4)?,
        files,
        warning: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, session_id, agent, entry_type, message, files, warning, created_at";

/// Latest `limit` entries, newest first. Timestamp ties fall back to insertion order.
pub fn get_recent_bulletin(db: &Datastore, limit: usize) -> Result<Vec<BulletinEntry>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {} FROM bulletin ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        ENTRY_COLUMNS
    ))?;
    let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Every entry strictly after `since`, oldest first.
pub fn get_bulletin_since(db: &Datastore, since: i64) -> Result<Vec<BulletinEntry>, CohortError> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {} FROM bulletin WHERE created_at > ?1 ORDER BY created_at ASC, rowid ASC",
        ENTRY_COLUMNS
    ))?;
    let rows = stmt.query_map(params![since], row_to_entry)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "bulletin",
        "version": "0.1.0",
        "description": "Append-only multi-writer activity log",
        "commands": [
            { "name": "post", "parameters": ["type", "message", "session?", "agent?", "files?", "warning?"] },
            { "name": "list", "parameters": ["limit?"] },
            { "name": "since", "parameters": ["timestamp"] }
        ],
        "storage": ["cohort.db:bulletin"]
    })
}
