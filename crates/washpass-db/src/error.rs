//! # Storage Errors
//!
//! What can go wrong below the engine, and how it is classified on the way up.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error / MigrateError / serde_json::Error                         │
//! │        │ From                                                           │
//! │        ▼                                                                │
//! │  DbError ── kind() ──►  NotFound │ Conflict │ Internal                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  EngineError::Storage  ──►  HTTP status picked from the kind;           │
//! │                             Internal text never reaches the client      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use washpass_core::ErrorKind;

/// Failure of a repository call. Messages are for logs, not customers.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write. `field` is `table.column`:
    /// - Barcode token collision (`entitlements.barcode_token`)
    /// - Duplicate gateway transaction id (`payments.external_transaction_id`)
    /// - Referral code collision (`accounts.referral_code`)
    /// - Second referral for the same invitee (`referrals.invitee_user_id`)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// e.g. `remaining_quota >= 0`
    #[error("Check constraint violation: {message}")]
    CheckViolation { message: String },

    #[error("Could not open database: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    #[error("Statement failed: {0}")]
    QueryFailed(String),

    /// A JSON column (e.g. a task payload) did not round-trip.
    #[error("JSON column error: {0}")]
    Serialization(String),

    /// No pooled connection became free within the acquire timeout.
    #[error("Timed out waiting for a database connection")]
    PoolExhausted,

    #[error("Database error: {0}")]
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

    /// True when this is a UNIQUE violation on `column` (`table.column`).
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field == column)
    }

    /// Classification in the shared error taxonomy.
    ///
    /// ```text
    /// NotFound         → NotFound
    /// UniqueViolation  → Conflict
    /// everything else  → Internal
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

/// SQLite reports constraint failures only through the message text, so
/// the prefix decides the variant.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if let Some(column) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::duplicate(column, "?")
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool already closed".into()),

            _ => DbError::Internal(err.to_string()),
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

pub type DbResult<T> = Result<T, DbError>;
