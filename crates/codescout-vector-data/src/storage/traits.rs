//! Storage abstraction traits for vector databases
//!
//! This module provides trait abstractions for vector storage backends,
//! enabling pluggable storage implementations and better testability.

use crate::VectorDataResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Payload attached to every chunk point.
///
/// Write paths populate every field; read paths parse leniently because a
/// scroll may request a subset of fields and foreign writers may have
/// stored partial payloads. `path` is the only field required to consider
/// a stored point meaningful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPayload {
    /// Normalized repository identity, the tenant key for all filters
    pub repo_id: String,
    /// Repo-relative file path with forward slashes
    pub path: String,
    /// 1-based first line of the chunk
    pub start_line: Option<i64>,
    /// 1-based last line of the chunk
    pub end_line: Option<i64>,
    /// Chunk text
    pub text: Option<String>,
    /// SHA-1 of the chunk text
    pub chunk_hash: Option<String>,
    /// SHA-1 of the whole file content
    pub file_hash: Option<String>,
    /// Commit the file was indexed at
    pub commit: Option<String>,
    /// RFC 3339 timestamp of the indexing write
    pub indexed_at: Option<String>,
    /// Tokenizer token count of the chunk text
    pub token_count: Option<i64>,
}

/// A point ready to be written: id, dense vector, payload
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A search hit with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// A scrolled point; the vector is present only when requested
#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id: Uuid,
    pub vector: Option<Vec<f32>>,
    pub payload: ChunkPayload,
}

/// One keyword equality condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub key: String,
    pub value: String,
}

/// Conjunction of `must` conditions, optionally OR-ed with `should`
/// conditions (any-of), mirroring the vector store's filter model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointFilter {
    pub must: Vec<FieldMatch>,
    pub should: Vec<FieldMatch>,
}

impl PointFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `must` equality condition
    pub fn must(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push(FieldMatch {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Add a `should` (any-of) equality condition
    pub fn should(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.should.push(FieldMatch {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Filter scoping to one repository
    pub fn repo(repo_id: &str) -> Self {
        Self::new().must("repo_id", repo_id)
    }
}

/// Parameters for one scroll pass
#[derive(Debug, Clone)]
pub struct ScrollRequest {
    pub filter: Option<PointFilter>,
    /// Return stored vectors (needed for point copies and metadata refresh)
    pub with_vector: bool,
    /// Restrict returned payload to these fields; `None` returns everything
    pub payload_fields: Option<Vec<String>>,
    /// Server-side page size
    pub page_size: usize,
}

impl Default for ScrollRequest {
    fn default() -> Self {
        Self {
            filter: None,
            with_vector: false,
            payload_fields: None,
            page_size: super::SCROLL_PAGE_SIZE,
        }
    }
}

/// One page of a scroll; `next_offset` is fed back to continue
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<PointRecord>,
    pub next_offset: Option<Uuid>,
}

/// Trait for vector storage backends
///
/// This trait abstracts vector database operations so the indexing and
/// search services never see a concrete client. The ensure-, upsert-,
/// and delete-style operations are idempotent.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VectorDataError::VectorSizeMismatch`] if the
    /// collection already exists with a different vector dimension.
    async fn ensure_collection(&self, name: &str, vector_size: usize) -> VectorDataResult<()>;

    /// Whether the collection exists
    async fn collection_exists(&self, name: &str) -> VectorDataResult<bool>;

    /// Upsert points in batches, creating the collection from the first
    /// point's dimension if needed. Writes wait for durability.
    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> VectorDataResult<()>;

    /// Delete all points matching the filter; a missing collection is a
    /// no-op.
    async fn delete_by_filter(&self, name: &str, filter: &PointFilter) -> VectorDataResult<()>;

    /// Nearest-neighbor search with an optional filter
    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PointFilter>,
    ) -> VectorDataResult<Vec<ScoredMatch>>;

    /// One page of a filtered scroll; a missing collection yields an empty
    /// terminal page so callers can treat "absent" as "empty".
    async fn scroll(
        &self,
        name: &str,
        request: &ScrollRequest,
        offset: Option<Uuid>,
    ) -> VectorDataResult<ScrollPage>;

    /// Idempotently create a keyword payload index on a field
    async fn ensure_payload_index(&self, name: &str, field: &str) -> VectorDataResult<()>;

    /// Drop the collection and invalidate caches for it
    async fn delete_collection(&self, name: &str) -> VectorDataResult<()>;

    /// Number of points currently stored
    async fn point_count(&self, name: &str) -> VectorDataResult<u64>;
}
