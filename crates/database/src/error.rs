//! Case store error types.

use thiserror::Error;

/// Errors returned by case store operations.
///
/// Every variant is a storage failure from the caller's point of view except
/// `NotFound`, which callers are free to treat as a benign miss.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Query, pool or connection failure.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No row matched.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A primary key or uniqueness constraint rejected the write.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },
}

impl DatabaseError {
    /// Whether this error only signals a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    /// Map a raw sqlx error, turning unique violations into `AlreadyExists`.
    pub(crate) fn on_insert(err: sqlx::Error, entity: &'static str, id: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return DatabaseError::AlreadyExists {
                    entity,
                    id: id.to_string(),
                };
            }
        }
        DatabaseError::Sqlx(err)
    }
}

/// Result type for case store operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
