use crate::core::error::CohortError;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::{Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};

/// Opens a connection with the settings every process must share: WAL journaling so many
/// readers and occasional writers from separate processes coexist, and foreign keys enforced.
pub fn db_connect(db_path: &Path) -> Result<Connection, CohortError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Explicit handle to the shared datastore. Construct one per process and pass it into
/// every operation.
pub struct Datastore {
    conn: Connection,
    path: PathBuf,
}

impl Datastore {
    /// Opens an existing project datastore. A missing file is reported as `NotInitialized`
    /// rather than silently creating an empty database.
    pub fn open(store: &Store) -> Result<Self, CohortError> {
        let path = store.db_path();
        if !path.exists() {
            return Err(CohortError::NotInitialized(format!(
                "datastore missing at {}",
                path.display()
            )));
        }
        Self::open_path(&path)
    }

    /// Creates the state directory and schema if needed, then opens the datastore.
    pub fn initialize(store: &Store) -> Result<Self, CohortError> {
        fs::create_dir_all(store.state_dir())?;
        let db = Self::open_path(&store.db_path())?;
        tracing::debug!(path = %db.path.display(), "datastore initialized");
        Ok(db)
    }

    /// Opens (creating if absent) a datastore at an arbitrary path and applies the schema.
    /// Every statement is `IF NOT EXISTS`, so reopening is cheap.
    pub fn open_path(path: &Path) -> Result<Self, CohortError> {
        let conn = db_connect(path)?;
        let db = Self {
            conn,
            path: path.to_path_buf(),
        };
        for stmt in schemas::ALL_SCHEMA {
            db.conn.execute(stmt, [])?;
        }
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` inside one transaction, committing on `Ok` and rolling back on `Err`.
    /// Operations hold `&Datastore`, so the transaction is opened without `&mut`; nested
    /// calls are not supported.
    pub fn with_tx<F, R>(&self, f: F) -> Result<R, CohortError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, CohortError>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
