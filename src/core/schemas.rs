//! Database schema definitions for the shared coordination datastore.
//!
//! One SQLite file (`.cohort/cohort.db`) holds every table. All processes touching the
//! project open it in WAL mode; see `core::db`.

pub const COHORT_DIR_NAME: &str = ".cohort";
pub const COHORT_DB_NAME: &str = "cohort.db";
pub const HEALTH_SNAPSHOT_NAME: &str = "health.json";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const POLICIES_DIR_NAME: &str = "policies";

// --- Sessions ---
pub const SESSIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        agent TEXT NOT NULL,
        pid INTEGER,
        intent TEXT,
        status TEXT NOT NULL DEFAULT 'active', -- active, idle, ended
        started_at INTEGER NOT NULL,
        last_activity_at INTEGER NOT NULL,
        ended_at INTEGER
    )
";
pub const SESSIONS_INDEX_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)";

// --- Claims ---
pub const CLAIMS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS claims (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        pattern TEXT NOT NULL,
        claim_type TEXT NOT NULL DEFAULT 'soft', -- soft, hard
        created_at INTEGER NOT NULL,
        released_at INTEGER,
        UNIQUE(session_id, pattern),
        FOREIGN KEY(session_id) REFERENCES sessions(id)
    )
";
pub const CLAIMS_INDEX_SESSION: &str =
    "CREATE INDEX IF NOT EXISTS idx_claims_session ON claims(session_id)";
pub const CLAIMS_INDEX_ACTIVE: &str =
    "CREATE INDEX IF NOT EXISTS idx_claims_active ON claims(created_at) WHERE released_at IS NULL";

// --- Bulletin ---
pub const BULLETIN_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS bulletin (
        id TEXT PRIMARY KEY,
        session_id TEXT,
        agent TEXT,
        entry_type TEXT NOT NULL,
        message TEXT NOT NULL,
        files TEXT, -- JSON array of paths
        warning TEXT,
        created_at INTEGER NOT NULL
    )
";
pub const BULLETIN_INDEX_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_bulletin_created ON bulletin(created_at)";

// --- Health ---
pub const HEALTH_SCORES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS health_scores (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        overall_score INTEGER NOT NULL,
        grade TEXT NOT NULL,
        categories TEXT NOT NULL, -- JSON object keyed by category name
        inputs_digest TEXT NOT NULL
    )
";
pub const HEALTH_SCORES_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_health_scores_timestamp ON health_scores(timestamp)";

// --- Policy encounters ---
pub const ENCOUNTERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS encounters (
        rule_id TEXT PRIMARY KEY,
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL,
        count INTEGER NOT NULL DEFAULT 1
    )
";

/// Statements run, in order, by `Datastore::initialize`.
pub const ALL_SCHEMA: &[&str] = &[
    SESSIONS_SCHEMA,
    SESSIONS_INDEX_STATUS,
    CLAIMS_SCHEMA,
    CLAIMS_INDEX_SESSION,
    CLAIMS_INDEX_ACTIVE,
    BULLETIN_SCHEMA,
    BULLETIN_INDEX_CREATED,
    HEALTH_SCORES_SCHEMA,
    HEALTH_SCORES_INDEX_TIMESTAMP,
    ENCOUNTERS_SCHEMA,
];
