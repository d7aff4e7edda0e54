//! Error normalization for the shard storage engine (spec §4.3).

use crate::error::Error as TopError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("shard busy, retry")]
    Retryable,

    #[error("unique constraint violated")]
    ConflictUnique,

    #[error("SQL syntax error: {0}")]
    Syntax(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("shard at capacity")]
    Capacity,

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
}

/// Classify a raw `rusqlite::Error` into the engine's normalized taxonomy.
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode as Sqlite;
        use rusqlite::Error as E;
        match &err {
            E::SqliteFailure(sqlite_err, _) => match sqlite_err.code {
                Sqlite::DatabaseBusy | Sqlite::DatabaseLocked => StorageError::Retryable,
                Sqlite::ConstraintViolation => StorageError::ConflictUnique,
                _ => StorageError::Sql(err.to_string()),
            },
            E::SqlInputError { .. } => StorageError::Syntax(err.to_string()),
            _ => StorageError::Sql(err.to_string()),
        }
    }
}

impl From<StorageError> for TopError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Retryable => TopError::Retryable("shard busy".into()),
            StorageError::ConflictUnique => TopError::ConflictUnique,
            StorageError::Syntax(msg) => TopError::SqlSyntaxError(msg),
            StorageError::Sql(msg) => TopError::Internal(msg),
            StorageError::Capacity => TopError::ShardCapacity,
            StorageError::TransactionNotFound(id) => TopError::TransactionNotFound(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
