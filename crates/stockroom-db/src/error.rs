//! # Local Store Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ───────────┐                                               │
//! │  MigrateError ──────────┼──► DbError ──┬──► repository caller (UI)      │
//! │  CoreError / Validation ┘              │                                │
//! │                                        └──► SyncError::Database         │
//! │                                             (ends the running drain)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Constraint failures are classified through `DatabaseError::kind()` so
//! callers can match on [`DbError::UniqueViolation`] instead of parsing
//! SQLite messages themselves.

use sqlx::error::ErrorKind;
use stockroom_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type for local store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Local store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// No row with this id.
    ///
    /// ## When This Occurs
    /// - `update` / `delete` of an id that was never stored (or already deleted)
    /// - `increment_retry` on an operation another drain already removed
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write.
    ///
    /// `field` is the `table.column` SQLite reported, or the domain field
    /// once a repository has mapped it (`barcode`, `id`).
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// NOT NULL, CHECK or FOREIGN KEY constraint failure.
    #[error("Constraint failed: {0}")]
    Constraint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A domain rule rejected the operation (item unavailable, log closed...).
    #[error(transparent)]
    Domain(#[from] CoreError),

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

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// ```text
/// RowNotFound                       → NotFound
/// Database(kind UniqueViolation)    → UniqueViolation { field: "table.column" }
/// Database(FK / NOT NULL / CHECK)   → Constraint
/// Database(other)                   → QueryFailed
/// PoolTimedOut                      → PoolExhausted
/// PoolClosed / Io                   → ConnectionFailed
/// anything else                     → Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    // "UNIQUE constraint failed: items.barcode"
                    ErrorKind::UniqueViolation => DbError::UniqueViolation {
                        field: message
                            .rsplit_once(": ")
                            .map(|(_, columns)| columns.to_string())
                            .unwrap_or_else(|| message.clone()),
                        value: "unknown".to_string(),
                    },
                    ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => DbError::Constraint(message),
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),

            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}
