use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CohortError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Not initialized: {0}. Run `cohort init` first.")]
    NotInitialized(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("External tool failure: {tool}: {message}")]
    ExternalToolFailure { tool: String, message: String },
    #[error("Commit blocked: {0} finding(s) at a blocking severity")]
    CommitBlocked(usize),
}
