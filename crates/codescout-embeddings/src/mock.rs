//! Mock embedding and tokenizer providers for testing
//!
//! The mock embedder produces deterministic vectors derived from the text
//! content, so similarity assertions behave predictably without a model.
//! The mock tokenizer treats each character as one token, which keeps the
//! prefix-decode property exact in tests.

#![allow(clippy::unwrap_used)]

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::provider::EmbeddingProvider;
use crate::tokenizer::{Tokenizer, TokenizerProvider};
use async_trait::async_trait;
use codescout_common::sha1_hex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Deterministic in-memory embedder
pub struct MockEmbeddingProvider {
    vector_size: usize,
    calls: AtomicUsize,
    embedded: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl MockEmbeddingProvider {
    pub fn new(vector_size: usize) -> Self {
        Self {
            vector_size,
            calls: AtomicUsize::new(0),
            embedded: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }

    /// Make every embed call fail with the given message
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    /// Number of embed calls made
    pub fn embed_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Every text that has been embedded, in call order
    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    /// The deterministic vector this mock produces for a text
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = sha1_hex(text);
        let bytes = digest.as_bytes();
        (0..self.vector_size)
            .map(|i| {
                let byte = bytes[i % bytes.len()];
                f32::from(byte) / 255.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, _model: &str, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(EmbeddingError::Provider(message));
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.embedded
            .lock()
            .unwrap()
            .extend(inputs.iter().cloned());
        Ok(inputs.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// One token per character; decode is an exact prefix
struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        tokens.iter().map(|&t| char::from_u32(t)).collect()
    }
}

/// Tokenizer provider handing out the char tokenizer for every model
#[derive(Default)]
pub struct MockTokenizerProvider;

impl MockTokenizerProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TokenizerProvider for MockTokenizerProvider {
    fn tokenizer(&self, _model: &str) -> EmbeddingResult<Arc<dyn Tokenizer>> {
        Ok(Arc::new(CharTokenizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_vectors_are_deterministic() {
        let provider = MockEmbeddingProvider::new(8);
        let a = provider.embed("m", &["same text".to_string()]).await.unwrap();
        let b = provider.embed("m", &["same text".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
        assert_eq!(provider.embed_calls(), 2);
    }

    #[test]
    fn test_char_tokenizer_prefix_decode() {
        let tokenizer = CharTokenizer;
        let tokens = tokenizer.encode("hello world");
        assert_eq!(tokens.len(), 11);
        assert_eq!(tokenizer.decode(&tokens[..5]).as_deref(), Some("hello"));
    }
}
