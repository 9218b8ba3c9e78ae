//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause. A cancelled query is reported
//! as [`StorageError::Cancelled`], never as a database failure.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The query was cancelled through its cancellation token.
    #[error("query cancelled")]
    Cancelled,

    /// An existing database was required but none was found at the location.
    #[error("no database at {0}")]
    NotFound(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Returns `true` if this error is the cancellation outcome of a query.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(StorageError::Cancelled.is_cancelled());
        assert!(!StorageError::Closed.is_cancelled());
        assert!(!StorageError::Database(sqlx::Error::RowNotFound).is_cancelled());
        assert!(!StorageError::NotFound("x.db".into()).is_cancelled());
        assert_eq!(StorageError::Cancelled.to_string(), "query cancelled");
        assert_eq!(
            StorageError::NotFound("x.db".into()).to_string(),
            "no database at x.db"
        );
    }
}
