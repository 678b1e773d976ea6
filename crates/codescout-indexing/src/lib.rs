//! Indexing engine and lifecycle orchestration for codescout
//!
//! The pure indexing engine ([`indexing::indexer::RepoIndexer`]) turns a
//! working tree into vector points: walk, chunk, embed, upsert, with
//! content-hash reuse and orphan cleanup. The lifecycle manager
//! ([`lifecycle::IndexLifecycleManager`]) owns index state transitions,
//! inline-versus-background decisions, cross-branch seeding, and crash
//! recovery; the worker module processes queued jobs inside isolated
//! runtimes.

pub mod chunking;
pub mod error;
pub mod identity;
pub mod indexing;
pub mod lifecycle;
pub mod runtime;
pub mod signature;
pub mod worker;

pub use chunking::{Chunk, Chunker};
pub use error::{IndexingError, IndexingResult};
pub use identity::{
    build_collection_name, derive_branch_slug, derive_repo_id, derive_repo_slug, parse_owner_repo,
    sanitize_url,
};
pub use indexing::indexer::{IndexOutcome, IndexParams, IndexerSettings, RepoIndexer};
pub use indexing::{Keepalive, ProgressSink};
pub use lifecycle::{GetOrInitRequest, IndexHandle, IndexLifecycleManager, IndexState};
pub use runtime::{IsolatedRuntime, LocalRuntimeProvider, RuntimeProvider};
pub use signature::ChunkingSignature;
pub use worker::IndexJobHandler;
