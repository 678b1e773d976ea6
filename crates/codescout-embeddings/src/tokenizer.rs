//! Tokenizer surface over tiktoken encoders
//!
//! Chunking needs three things from a tokenizer: encode, prefix decode,
//! and counting. Prefix decode can legitimately fail when a window
//! boundary splits a multi-byte character; callers nudge the boundary
//! instead of forcing lossy output.

use crate::error::{EmbeddingError, EmbeddingResult};
use dashmap::DashMap;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Minimal tokenizer interface used by chunking
pub trait Tokenizer: Send + Sync {
    /// Encode text into model tokens
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode a token prefix back to text.
    ///
    /// Returns `None` when the prefix ends mid-character; the byte
    /// sequence is a valid prefix of the original text either way, but we
    /// only hand out well-formed strings.
    fn decode(&self, tokens: &[u32]) -> Option<String>;

    /// Token count of a text
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Provider of per-model tokenizers
pub trait TokenizerProvider: Send + Sync {
    /// Tokenizer for a model identifier
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Tokenizer`] if no encoder can be built.
    fn tokenizer(&self, model: &str) -> EmbeddingResult<Arc<dyn Tokenizer>>;

    /// Count tokens of a text under a model
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Tokenizer`] if no encoder can be built.
    fn count_tokens(&self, model: &str, text: &str) -> EmbeddingResult<usize> {
        Ok(self.tokenizer(model)?.count(text))
    }
}

struct BpeTokenizer {
    encoder: CoreBPE,
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.encoder.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        self.encoder.decode(tokens.to_vec()).ok()
    }
}

/// Encoder families by model name. Embedding models and GPT-4-era chat
/// models share `cl100k_base`; the `o`/4o generation uses `o200k_base`.
fn encoder_family(model: &str) -> &'static str {
    if model.starts_with("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") {
        "o200k_base"
    } else {
        "cl100k_base"
    }
}

/// Tokenizer provider backed by tiktoken, one cached encoder per family
#[derive(Default)]
pub struct TiktokenProvider {
    cache: DashMap<&'static str, Arc<dyn Tokenizer>>,
}

impl TiktokenProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenizerProvider for TiktokenProvider {
    fn tokenizer(&self, model: &str) -> EmbeddingResult<Arc<dyn Tokenizer>> {
        let family = encoder_family(model);
        if let Some(cached) = self.cache.get(family) {
            return Ok(Arc::clone(&cached));
        }

        let encoder = match family {
            "o200k_base" => o200k_base(),
            _ => cl100k_base(),
        }
        .map_err(|e| EmbeddingError::Tokenizer(format!("{family}: {e}")))?;

        let tokenizer: Arc<dyn Tokenizer> = Arc::new(BpeTokenizer { encoder });
        self.cache.insert(family, Arc::clone(&tokenizer));
        Ok(tokenizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let provider = TiktokenProvider::new();
        let tokenizer = provider.tokenizer("text-embedding-3-small").unwrap();

        let text = "fn main() {\n    println!(\"hello\");\n}\n";
        let tokens = tokenizer.encode(text);
        assert!(!tokens.is_empty());
        assert_eq!(tokenizer.decode(&tokens).as_deref(), Some(text));
    }

    #[test]
    fn test_prefix_decode_is_text_prefix() {
        let provider = TiktokenProvider::new();
        let tokenizer = provider.tokenizer("text-embedding-3-small").unwrap();

        let text = "let answer = compute(41) + 1;";
        let tokens = tokenizer.encode(text);
        let half = tokens.len() / 2;
        if let Some(prefix) = tokenizer.decode(tokens.get(..half).unwrap_or(&[])) {
            assert!(text.starts_with(&prefix));
        }
    }

    #[test]
    fn test_count_matches_encode_len() {
        let provider = TiktokenProvider::new();
        let tokenizer = provider.tokenizer("text-embedding-3-small").unwrap();
        let text = "a small piece of text";
        assert_eq!(tokenizer.count(text), tokenizer.encode(text).len());
        assert_eq!(tokenizer.count(""), 0);
    }

    #[test]
    fn test_provider_caches_per_family() {
        let provider = TiktokenProvider::new();
        let a = provider.tokenizer("text-embedding-3-small").unwrap();
        let b = provider.tokenizer("gpt-4").unwrap();
        assert!(Arc::ptr_eq(&a, &b), "same family should share the encoder");
    }
}
