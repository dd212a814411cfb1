//! Metadata store error types.

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A concurrent write touched the same vote record. Safe to retry the
    /// whole operation from a fresh read.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// PostgreSQL serialization failure and deadlock, SQLite busy/locked
/// (primary and extended result codes).
const CONTENTION_CODES: &[&str] = &["40001", "40P01", "5", "6", "261", "262", "517"];

/// Map a driver error raised inside a vote transaction onto the store's error
/// taxonomy.
///
/// Unique violations and lock contention mean another transition on the same
/// pair won the race. A foreign key violation means the subject disappeared
/// underneath us. A check violation means a counter would have gone negative,
/// which only happens if counters had already drifted from the ledger.
pub(crate) fn classify_vote_error(err: sqlx::Error, subject_id: &str) -> MetadataError {
    if let sqlx::Error::Database(db) = &err {
        match db.kind() {
            ErrorKind::UniqueViolation => {
                return MetadataError::Conflict(format!(
                    "concurrent vote on subject '{subject_id}'"
                ));
            }
            ErrorKind::ForeignKeyViolation => {
                return MetadataError::NotFound(format!("subject '{subject_id}'"));
            }
            ErrorKind::CheckViolation => {
                return MetadataError::Constraint(format!(
                    "counters for subject '{subject_id}' would become negative"
                ));
            }
            _ => {}
        }
        if let Some(code) = db.code().filter(|c| CONTENTION_CODES.contains(&c.as_ref())) {
            return MetadataError::Conflict(format!(
                "lock contention on subject '{subject_id}' ({code})"
            ));
        }
    }
    MetadataError::Database(err)
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}
