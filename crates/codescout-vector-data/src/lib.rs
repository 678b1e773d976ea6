//! Vector store adapter for codescout
//!
//! A narrow, typed facade over the vector database: collection lifecycle,
//! batched upserts, filtered deletes, vector search, paginated scroll, and
//! payload indexes. Everything above this crate speaks [`VectorStore`];
//! only this crate speaks Qdrant.

pub mod error;
pub mod storage;

pub use error::{VectorDataError, VectorDataResult};
pub use storage::mock::MockVectorStore;
pub use storage::qdrant::QdrantStore;
pub use storage::traits::{
    ChunkPayload, FieldMatch, PointFilter, PointRecord, ScoredMatch, ScrollPage, ScrollRequest,
    VectorPoint, VectorStore,
};
pub use storage::{scroll_all, sized_collection_name};
