//! Search error types

use codescout_embeddings::EmbeddingError;
use codescout_vector_data::VectorDataError;
use thiserror::Error;

/// Errors from the query side
#[derive(Debug, Error)]
pub enum SearchError {
    /// The provider returned no vector for the query text
    #[error("Embedding provider returned no vector for query: {query}")]
    EmbeddingEmpty { query: String },

    /// Embedding the query failed
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector search failed (a missing collection is handled, not raised)
    #[error(transparent)]
    Vector(#[from] VectorDataError),
}

/// Specialized Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;
