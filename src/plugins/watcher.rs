//! Polling watcher: turns working-tree and `HEAD` movement into bulletin entries.
//!
//! One long-running process registers its own session, then on every tick renews that lease,
//! sweeps stale sessions, diffs an mtime snapshot of the tree and checks whether `HEAD` moved.
//! Nothing here holds state beyond the previous snapshot; coordination stays in the datastore.

use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::store::Store;
use crate::core::time;
use crate::core::vcs;
use crate::plugins::bulletin::{self, NewBulletinEntry, entry_types};
use crate::plugins::claim::{self, ConflictWarning};
use crate::plugins::health::SKIP_DIRS;
use crate::plugins::session;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, UNIX_EPOCH};
use walkdir::WalkDir;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const WATCHER_AGENT: &str = "cohort-watch";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified_ms: i64,
    pub len: u64,
}

/// Relative path (forward slashes) to its last observed stamp.
pub type FileSnapshot = BTreeMap<String, FileStamp>;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Every touched path, sorted.
    pub fn changed_paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .cloned()
            .collect();
        all.sort();
        all
    }
}

/// Sorted mtime snapshot of the project tree.
pub fn snapshot_tree(root: &Path) -> FileSnapshot {
    let mut snapshot = FileSnapshot::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && SKIP_DIRS.iter().any(|d| e.file_name() == *d))
        });
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        snapshot.insert(
            rel.to_string_lossy().replace('\\', "/"),
            FileStamp {
                modified_ms,
                len: meta.len(),
            },
        );
    }
    snapshot
}

/// Pure comparison of two snapshots. Output lists are sorted because the maps are.
pub fn diff_snapshots(before: &FileSnapshot, after: &FileSnapshot) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();
    for (path, stamp) in after {
        match before.get(path) {
            None => diff.added.push(path.clone()),
            Some(prev) if prev != stamp => diff.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    diff.removed = before
        .keys()
        .filter(|p| !after.contains_key(*p))
        .cloned()
        .collect();
    diff
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    pub agent: String,
    pub stale_minutes: i64,
    /// Stop after this many ticks. `None` runs until the stop flag is raised.
    pub max_ticks: Option<u64>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            agent: WATCHER_AGENT.to_string(),
            stale_minutes: 30,
            max_ticks: None,
        }
    }
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct TickReport {
    pub changed: Vec<String>,
    pub conflicts: Vec<ConflictWarning>,
    pub commit: Option<String>,
    pub reclaimed: usize,
}

pub struct Watcher<'a> {
    db: &'a Datastore,
    root: std::path::PathBuf,
    session_id: String,
    agent: String,
    stale_minutes: i64,
    snapshot: FileSnapshot,
    head: Option<String>,
    git: bool,
}

impl<'a> Watcher<'a> {
    pub fn start(db: &'a Datastore, store: &Store, opts: &WatchOptions) -> Result<Self, CohortError> {
        Self::start_at(db, store, opts, time::now_millis())
    }

    pub fn start_at(
        db: &'a Datastore,
        store: &Store,
        opts: &WatchOptions,
        now: i64,
    ) -> Result<Self, CohortError> {
        let session = session::register_session_at(
            db,
            &opts.agent,
            Some(std::process::id() as i64),
            Some("watching the working tree"),
            now,
        )?;
        let git = vcs::is_repository(&store.root);
        let head = if git { vcs::head_commit(&store.root)? } else { None };
        tracing::info!(session = %session.id, git, "watcher started");
        Ok(Self {
            db,
            root: store.root.clone(),
            session_id: session.id,
            agent: opts.agent.clone(),
            stale_minutes: opts.stale_minutes,
            snapshot: snapshot_tree(&store.root),
            head,
            git,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tick(&mut self) -> Result<TickReport, CohortError> {
        self.tick_at(time::now_millis())
    }

    pub fn tick_at(&mut self, now: i64) -> Result<TickReport, CohortError> {
        let mut report = TickReport::default();
        session::touch_session_at(self.db, &self.session_id, now)?;
        report.reclaimed =
            session::cleanup_stale_sessions_at(self.db, self.stale_minutes, now).unwrap_or_else(
                |e| {
                    tracing::warn!(error = %e, "stale session sweep failed");
                    0
                },
            );

        let current = snapshot_tree(&self.root);
        let diff = diff_snapshots(&self.snapshot, &current);
        self.snapshot = current;
        if !diff.is_empty() {
            report.changed = diff.changed_paths();
            let claims = claim::list_active_claims(self.db)?;
            report.conflicts = report
                .changed
                .iter()
                .filter_map(|p| claim::resolve(&claims, p).conflict_for(p, Some(&self.session_id)))
                .collect();

            let mut entry = NewBulletinEntry::new(
                entry_types::FILE_CHANGE,
                format!("{} file(s) changed", report.changed.len()),
            )
            .session(&self.session_id)
            .agent(&self.agent)
            .files(report.changed.clone());
            if !report.conflicts.is_empty() {
                let warning = report
                    .conflicts
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                entry = entry.warning(warning);
            }
            bulletin::post_bulletin_at(self.db, &entry, now)?;
            tracing::debug!(files = report.changed.len(), "file changes posted");
        }

        if self.git {
            match vcs::head_commit(&self.root) {
                Ok(head) if head.is_some() && head != self.head => {
                    let rev = head.clone().unwrap_or_default();
                    let subject = vcs::commit_subject(&self.root, &rev).unwrap_or_default();
                    let short: String = rev.chars().take(8).collect();
                    bulletin::post_bulletin_at(
                        self.db,
                        &NewBulletinEntry::new(
                            entry_types::COMMIT,
                            format!("commit {}: {}", short, subject),
                        )
                        .session(&self.session_id)
                        .agent(&self.agent),
                        now,
                    )?;
                    report.commit = Some(rev);
                    self.head = head;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "could not read HEAD"),
            }
        }
        Ok(report)
    }

    /// Ends the watcher's session.
    pub fn finish(self) -> Result<(), CohortError> {
        session::end_session(self.db, &self.session_id)?;
        tracing::info!(session = %self.session_id, "watcher stopped");
        Ok(())
    }
}

/// Runs ticks until `stop` is raised, `max_ticks` is reached or a tick fails. The session is
/// ended on every one of those paths. Returns the number of completed ticks.
pub fn run_watch(
    db: &Datastore,
    store: &Store,
    opts: &WatchOptions,
    stop: &AtomicBool,
    mut on_tick: impl FnMut(&TickReport),
) -> Result<u64, CohortError> {
    let mut watcher = Watcher::start(db, store, opts)?;
    let mut ticks = 0u64;
    let outcome = loop {
        if stop.load(Ordering::Relaxed) || opts.max_ticks.is_some_and(|max| ticks >= max) {
            break Ok(ticks);
        }
        std::thread::sleep(opts.interval);
        match watcher.tick() {
            Ok(report) => {
                ticks += 1;
                on_tick(&report);
            }
            Err(e) => break Err(e),
        }
    };
    watcher.finish()?;
    outcome
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "watcher",
        "version": "0.2.0",
        "description": "Polls the working tree and HEAD, posting file_change and commit entries",
        "commands": [
            { "name": "watch", "parameters": ["interval_ms?", "ticks?"] }
        ],
        "storage": ["cohort.db:bulletin"]
    })
}
