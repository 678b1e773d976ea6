//! Vector storage errors and message classification
//!
//! The vector database reports most failures as flat strings, so the
//! adapter classifies by message. Patterns are scoped to Qdrant-style
//! phrasing to avoid false positives from unrelated "not found" errors.

use thiserror::Error;

/// Errors from the vector storage layer
#[derive(Debug, Error)]
pub enum VectorDataError {
    /// The named collection does not exist
    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    /// Idempotent creation raced with another creator
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A collection exists with a different vector dimension
    #[error("Vector size mismatch for '{collection}': expected {expected}, found {actual}")]
    VectorSizeMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Network-ish failure worth a bounded retry
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl VectorDataError {
    /// Classify a raw client error message into a typed error
    pub fn classify(collection: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_collection_not_found(&message) {
            Self::CollectionNotFound {
                collection: collection.to_string(),
            }
        } else if is_already_exists(&message) {
            Self::AlreadyExists(message)
        } else if is_transient(&message) {
            Self::Transient(message)
        } else {
            Self::Storage(message)
        }
    }

    /// Whether a bounded retry is worthwhile
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Qdrant-style "collection missing" phrasing.
///
/// Deliberately narrow: "User not found" from some proxy must not match.
pub fn is_collection_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.trim() == "not found" {
        return true;
    }
    if let Some(idx) = lower.find("collection") {
        let tail = lower.get(idx..).unwrap_or("");
        return tail.contains("not found") || tail.contains("doesn't exist") || tail.contains("does not exist");
    }
    false
}

/// Qdrant's idempotency-race phrasing for index/collection creation
pub fn is_already_exists(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}

/// Connection-level failures that a short retry can paper over
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "broken pipe",
        "unavailable",
        "transport error",
        "tcp connect",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Specialized Result type for vector storage operations
pub type VectorDataResult<T> = Result<T, VectorDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_not_found_classification() {
        assert!(is_collection_not_found(
            "Collection `codebase_acme_768` doesn't exist!"
        ));
        assert!(is_collection_not_found("collection foo not found"));
        assert!(is_collection_not_found("Not found"));
        // Unrelated not-found phrasing must not match
        assert!(!is_collection_not_found("User not found"));
        assert!(!is_collection_not_found("point id not found"));
    }

    #[test]
    fn test_already_exists_classification() {
        assert!(is_already_exists("index already exists"));
        assert!(!is_already_exists("index creation failed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient("transport error: connection refused"));
        assert!(is_transient("deadline timed out"));
        assert!(!is_transient("invalid vector dimension"));
    }

    #[test]
    fn test_classify_produces_typed_variants() {
        let err = VectorDataError::classify("c", "Collection `c` doesn't exist!");
        assert!(matches!(err, VectorDataError::CollectionNotFound { .. }));

        let err = VectorDataError::classify("c", "connection reset by peer");
        assert!(err.is_transient());
    }
}
