//! Common error types for the jukebox crates

use thiserror::Error;

use crate::retry::Conflicting;

/// Common result type for jukebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result code for SQLITE_BUSY
#[cfg(feature = "sqlx")]
const SQLITE_BUSY: i64 = 5;

/// Common error types shared by the server and renderer crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Concurrent write collision detected by the persistence tier
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is a write collision worth retrying.
    ///
    /// Classification is structural: sqlx's `UniqueViolation` kind (a
    /// position or priority-flag collision against a partial unique index)
    /// and SQLite's BUSY family of result codes (another writer committed
    /// first). Message text is never inspected.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            #[cfg(feature = "sqlx")]
            Error::Database(err) => is_sqlx_conflict(err),
            _ => false,
        }
    }
}

impl Conflicting for Error {
    fn is_conflict(&self) -> bool {
        Error::is_conflict(self)
    }
}

/// Structural conflict classification for raw sqlx errors
#[cfg(feature = "sqlx")]
pub fn is_sqlx_conflict(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };

    if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) {
        return true;
    }

    // Extended codes carry the primary code in the low byte
    // (SQLITE_BUSY_SNAPSHOT = 517 = 5 | 2 << 8).
    db_err
        .code()
        .and_then(|code| code.parse::<i64>().ok())
        .map(|code| code & 0xff == SQLITE_BUSY)
        .unwrap_or(false)
}
