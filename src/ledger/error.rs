/// Ledger Error Types
///
/// Every ledger operation returns `LedgerResult`. Authentication failures
/// deliberately carry no detail so callers cannot tell an unknown group id
/// from a wrong secret.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("corrupt stored value: {0}")]
    Json(#[from] serde_json::Error),

    /// The database was written by a newer build.
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion { db_version: u32, latest_supported: u32 },

    /// Unknown group id or wrong secret.
    #[error("Invalid group or secret")]
    Unauthorized,

    /// Caller supplied values that violate a ledger rule.
    #[error("{0}")]
    InvalidInput(String),

    /// The connection lock was poisoned by a panicking holder.
    #[error("ledger unavailable")]
    Unavailable,
}

impl LedgerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
