//! Database error types

use thiserror::Error;

/// Errors from the relational data layer
#[derive(Debug, Error)]
pub enum MetaDataError {
    /// A query failed; `operation` names the logical operation for logs
    #[error("Database query failed during {operation}: {source}")]
    Query {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// Pool or connection failure
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Entity lookup came back empty where a row was required
    #[error("Not found: {0}")]
    NotFound(String),

    /// State conflict (e.g. indexing already in progress)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Token encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Specialized Result type for data-layer operations
pub type MetaDataResult<T> = Result<T, MetaDataError>;

/// Extension trait attaching operation names to raw sqlx errors
pub trait MetaDataErrorExt<T> {
    /// Wrap an sqlx error with the logical operation that ran
    fn map_db_err(self, operation: &str) -> MetaDataResult<T>;
}

impl<T> MetaDataErrorExt<T> for Result<T, sqlx::Error> {
    fn map_db_err(self, operation: &str) -> MetaDataResult<T> {
        self.map_err(|source| MetaDataError::Query {
            operation: operation.to_string(),
            source,
        })
    }
}
