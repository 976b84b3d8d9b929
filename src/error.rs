//! Error taxonomy for document operations.

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum AnnotateError {
    /// Unknown document, block or word.
    #[error("{0} not found")]
    NotFound(String),

    /// A concurrent writer changed the document first.
    #[error("conflicting update: {0}")]
    Conflict(String),

    /// Malformed request, rejected before any mutation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The labeling capability failed. Numbering is untouched.
    #[error("labeling failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// A post-condition on activation orders or sentence numbers failed and
    /// the transaction was abandoned.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("storage error: {0}")]
    Storage(sqlx::Error),

    /// Reading or writing a stored upload failed.
    #[error("file storage error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnnotateError>;

// SQLITE_BUSY, SQLITE_LOCKED and their extended codes (BUSY_RECOVERY,
// BUSY_SNAPSHOT, LOCKED_SHAREDCACHE).
const LOCK_CODES: &[&str] = &["5", "6", "261", "517", "262"];

impl From<sqlx::Error> for AnnotateError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let locked = db_err
                .code()
                .map(|code| LOCK_CODES.contains(&code.as_ref()))
                .unwrap_or(false);
            if locked || db_err.message().contains("database is locked") {
                return AnnotateError::Conflict(db_err.message().to_string());
            }
        }
        AnnotateError::Storage(err)
    }
}

impl AnnotateError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        AnnotateError::NotFound(what.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AnnotateError::Validation(message.into())
    }
}
