//! Chunking signature
//!
//! A stable hash over every parameter that affects chunk boundaries. It
//! is stored on each index row; a mismatch at claim time forces a full
//! reindex, because stored points would no longer line up with what the
//! chunker produces.

use codescout_common::sha1_hex;
use codescout_config::{EmbeddingConfig, IndexingConfig};
use serde::Serialize;
use uuid::Uuid;

/// All chunking-relevant parameters, in one serializable record.
///
/// Strategy markers are fixed strings so a future strategy change can't
/// silently alias an old signature.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkingSignature {
    pub break_strategy: &'static str,
    pub embedding_input_format: &'static str,
    pub ignore_source: String,
    pub line_counting: &'static str,
    pub max_embedding_tokens: usize,
    pub max_file_bytes: usize,
    pub overlap_tokens: usize,
    pub target_tokens: usize,
    pub uuid_namespace: Uuid,
}

impl ChunkingSignature {
    /// Signature from raw parameters; target and overlap are clamped the
    /// same way the chunker clamps them.
    pub fn new(
        target_tokens: usize,
        overlap_tokens: usize,
        max_embedding_tokens: usize,
        max_file_bytes: usize,
        ignore_source: impl Into<String>,
        uuid_namespace: Uuid,
    ) -> Self {
        let target = target_tokens.min(max_embedding_tokens).max(1);
        let overlap = overlap_tokens.min(target.saturating_sub(1));

        Self {
            break_strategy: "token-window",
            embedding_input_format: "raw",
            ignore_source: ignore_source.into(),
            line_counting: "line-start-offsets",
            max_embedding_tokens,
            max_file_bytes,
            overlap_tokens: overlap,
            target_tokens: target,
            uuid_namespace,
        }
    }

    /// Signature of the effective (clamped) chunking configuration
    pub fn from_config(indexing: &IndexingConfig, embedding: &EmbeddingConfig) -> Self {
        Self::new(
            indexing.chunk_target_tokens,
            indexing.chunk_overlap_tokens,
            embedding.max_tokens,
            indexing.max_file_bytes,
            indexing.ignore_file.clone(),
            indexing.point_namespace,
        )
    }

    /// SHA-1 of the sorted-key JSON serialization.
    ///
    /// `serde_json`'s map type is a BTreeMap here, so going through
    /// `Value` sorts object keys; arrays would keep their order.
    pub fn hash(&self) -> String {
        let serialized = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default();
        sha1_hex(serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> (IndexingConfig, EmbeddingConfig) {
        (IndexingConfig::from_env(), EmbeddingConfig::from_env())
    }

    #[test]
    fn test_hash_is_stable() {
        let (indexing, embedding) = configs();
        let a = ChunkingSignature::from_config(&indexing, &embedding).hash();
        let b = ChunkingSignature::from_config(&indexing, &embedding).hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_hash_changes_with_parameters() {
        let (mut indexing, embedding) = configs();
        let before = ChunkingSignature::from_config(&indexing, &embedding).hash();
        indexing.chunk_target_tokens = indexing.chunk_target_tokens.saturating_add(1);
        let after = ChunkingSignature::from_config(&indexing, &embedding).hash();
        assert_ne!(before, after);
    }

    #[test]
    fn test_signature_reflects_clamped_values() {
        let (mut indexing, embedding) = configs();
        indexing.chunk_target_tokens = 100;
        indexing.chunk_overlap_tokens = 500; // over target; clamps to 99
        let signature = ChunkingSignature::from_config(&indexing, &embedding);
        assert_eq!(signature.overlap_tokens, 99);
        assert_eq!(signature.target_tokens, 100);
    }
}
