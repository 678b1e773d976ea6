//! Indexing error types

use codescout_embeddings::EmbeddingError;
use codescout_meta_data::MetaDataError;
use codescout_repo::RepoError;
use codescout_vector_data::VectorDataError;
use thiserror::Error;

/// Errors from the indexing engine and lifecycle manager
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Git or shell failure in the working tree
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Vector store failure
    #[error(transparent)]
    Vector(#[from] VectorDataError),

    /// Embedding or tokenizer failure
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Relational store failure
    #[error(transparent)]
    MetaData(#[from] MetaDataError),

    /// Bad input to a public operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation conflicts with current index state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Entity lookup came back empty
    #[error("Not found: {0}")]
    NotFound(String),

    /// Isolated runtime provisioning or cleanup failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Unexpected internal failure (e.g. a panicked task)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl codescout_common::CommonError for IndexingError {
    fn io_error(msg: impl Into<String>) -> Self {
        Self::Repo(RepoError::Io(msg.into()))
    }

    fn config_error(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn other_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

codescout_common::impl_common_conversions!(IndexingError);

/// Specialized Result type for indexing operations
pub type IndexingResult<T> = Result<T, IndexingError>;
