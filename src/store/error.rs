//! Store Errors
//!
//! Error types for storage operations. Constraint failures are classified so
//! the engine can tell an idempotent replay from an infrastructure fault.

/// Errors that can occur in a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A check constraint rejected the write (e.g. negative balance)
    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// A foreign key constraint rejected the write or delete
    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    /// Row locks could not be acquired in time
    #[error("Timed out waiting for row lock")]
    LockTimeout,

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

/// Store Result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Postgres SQLSTATE codes we classify
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const QUERY_CANCELED: &str = "57014";
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or_default().to_string();
                match db_err.code().as_deref() {
                    Some(sqlstate::UNIQUE_VIOLATION) => Some(StoreError::UniqueViolation { constraint }),
                    Some(sqlstate::CHECK_VIOLATION) => Some(StoreError::CheckViolation { constraint }),
                    Some(sqlstate::FOREIGN_KEY_VIOLATION) => {
                        Some(StoreError::ForeignKeyViolation { constraint })
                    }
                    Some(sqlstate::LOCK_NOT_AVAILABLE) | Some(sqlstate::QUERY_CANCELED) => {
                        Some(StoreError::LockTimeout)
                    }
                    _ => None,
                }
            }
            sqlx::Error::PoolTimedOut => Some(StoreError::LockTimeout),
            _ => None,
        };

        classified.unwrap_or(StoreError::Database(err))
    }
}
