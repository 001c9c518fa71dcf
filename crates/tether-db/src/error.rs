//! # Storage Errors
//!
//! ```text
//!   sqlx::Error ──► DbError ──► SyncError::DatabaseError (tether-sync)
//!                      │
//!                      └─ record-level variants (MissingConflictKey,
//!                         ConstraintViolation) are reported per record
//!                         instead of aborting the sync
//! ```

use thiserror::Error;

/// Result type for storage operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    // =========================================================================
    // Record-level
    // =========================================================================
    /// A row the caller expected is gone, e.g. a token revoked while a
    /// refresh was in flight.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The record's conflict column is missing, null or not a scalar.
    #[error("Record for '{table}' has no usable '{column}' value")]
    MissingConflictKey { table: String, column: String },

    /// A CHECK constraint rejected the row.
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Unique constraint violated on {target}")]
    UniqueViolation { target: String },

    /// Table or column name that is not a plain identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A stored JSON document could not be read or written.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Store-level
    // =========================================================================
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for failures caused by the record itself rather than the store.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            DbError::MissingConflictKey { .. }
                | DbError::ConstraintViolation { .. }
                | DbError::InvalidIdentifier(_)
        )
    }
}

// SQLite reports constraint kinds only in the message text:
//   "UNIQUE constraint failed: <table>.<column>"
//   "CHECK constraint failed: <expr>"
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if let Some(target) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::UniqueViolation {
                        target: target.to_string(),
                    }
                } else if msg.starts_with("CHECK constraint failed") {
                    DbError::ConstraintViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}
