//! Application-wide error types.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    /// A decrement would have driven a campaign below zero. The mutation is
    /// aborted; the amount is never clamped.
    #[error(
        "Arithmetic invariant violated: project {project_id} holds {current}, cannot subtract {decrement}"
    )]
    ArithmeticInvariantViolation {
        project_id: i64,
        current: Decimal,
        decrement: Decimal,
    },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// SQLite primary result codes for a lock held by another connection.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether `err` is SQLite refusing a lock another writer holds, including
/// the extended `BUSY_SNAPSHOT` raised when a stale read tries to write.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if is_lock_contention(&err) {
            Self::Conflict(format!("another write holds the database lock: {err}"))
        } else {
            Self::Database(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
