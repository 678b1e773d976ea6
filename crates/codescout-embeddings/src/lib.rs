//! Embedding and tokenizer providers for codescout
//!
//! The embedding model runs as an external HTTP service; this crate owns
//! the typed client for it plus the local tokenizer surface used for
//! chunking and token counting. Everything upstream depends on the
//! [`EmbeddingProvider`] and [`TokenizerProvider`] traits, never on the
//! wire format.

pub mod error;
pub mod mock;
pub mod provider;
pub mod tokenizer;

pub use error::{EmbeddingError, EmbeddingResult, is_auth_error};
pub use mock::{MockEmbeddingProvider, MockTokenizerProvider};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use tokenizer::{TiktokenProvider, Tokenizer, TokenizerProvider};
