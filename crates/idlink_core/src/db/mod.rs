//! Contact store database: connection bootstrap, schema, failure classes.
//!
//! # Responsibility
//! - Open SQLite connections tuned for many short write transactions.
//! - Bring the `contacts` schema up to date before any contact is touched.
//! - Sort SQLite failures into lock contention, lost storage and the rest.
//!
//! # Invariants
//! - The `contacts` schema version lives in `PRAGMA user_version`.
//! - A database stamped by a newer binary is never opened for writes.

use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_in_memory_with, open_db_with};

pub type DbResult<T> = Result<T, DbError>;

/// Failure below the contact repository.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// `contacts` schema is ahead of this binary.
    SchemaTooNew { found: u32, supported: u32 },
}

impl DbError {
    /// Another connection holds the write lock.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// The database file cannot be reached or trusted any more.
    pub fn is_storage_lost(&self) -> bool {
        match self {
            Self::SchemaTooNew { .. } => true,
            Self::Sqlite(_) => matches!(
                self.sqlite_code(),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::DiskFull
                        | ErrorCode::ReadOnly
                        | ErrorCode::PermissionDenied
                )
            ),
        }
    }

    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "contacts schema v{found} is newer than this build (v{supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
