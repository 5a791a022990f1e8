//! Error types for ledger storage.

use fusion_ledger_core::{LedgerError, UserId};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Insufficient credits and replayed payments are not errors; see
/// [`crate::AppendResult`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed. Safe to retry: nothing was written.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record ("user", "transaction").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A direct projection write disagreed with the transaction log.
    #[error("balance projection mismatch for {user_id}: log sums to {expected}, attempted {attempted}")]
    ProjectionMismatch {
        /// The user whose projection was written.
        user_id: UserId,
        /// `SUM(amount)` at the time of the write.
        expected: i64,
        /// Value the caller tried to store.
        attempted: i64,
    },

    /// A refund named a transaction it cannot reverse.
    #[error("invalid reversal: {0}")]
    InvalidReversal(String),

    /// The backend answered in a way the ledger operation cannot produce,
    /// such as a debit reported as a replayed payment. Retrying won't help.
    #[error("inconsistent ledger outcome: {0}")]
    Inconsistent(String),

    /// The transaction itself was malformed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl StoreError {
    /// Shorthand for a missing user.
    #[must_use]
    pub fn user_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "user",
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(feature = "rocksdb-backend")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}
