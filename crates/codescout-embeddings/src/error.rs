//! Embedding service errors

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static AUTH_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)auth|api.key|unauthorized|forbidden").ok());

/// Whether an error message indicates rejected credentials
pub fn is_auth_error(message: &str) -> bool {
    AUTH_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Errors from the embedding and tokenizer providers
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider rejected our credentials
    #[error("Embedding provider rejected credentials: {0}")]
    Auth(String),

    /// The provider returned zero vectors where one was expected
    #[error("Embedding provider returned no vectors")]
    Empty,

    /// Network-level failure worth a bounded retry
    #[error("Transient embedding error: {0}")]
    Transient(String),

    /// Any other provider failure
    #[error("Embedding request failed: {0}")]
    Provider(String),

    /// Tokenizer could not be constructed for a model
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

impl EmbeddingError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Specialized Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_pattern_matches_provider_phrasings() {
        assert!(is_auth_error("Invalid API key provided"));
        assert!(is_auth_error("401 Unauthorized"));
        assert!(is_auth_error("403 Forbidden"));
        assert!(is_auth_error("authentication failed"));
        assert!(is_auth_error("bad api_key"));
        assert!(!is_auth_error("connection reset by peer"));
    }
}
