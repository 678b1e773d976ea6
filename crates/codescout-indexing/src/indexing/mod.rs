//! The indexing engine

pub mod indexer;

use async_trait::async_trait;

/// Receives token-progress updates during an indexing run.
///
/// The production implementation increments `indexed_tokens` with an
/// atomic DB-side update; observers may read the counter at any time.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn add_tokens(&self, tokens: i64);
}

/// Keeps a long-running job's runtime marked as in-use so idle reaping
/// does not tear it down mid-index.
#[async_trait]
pub trait Keepalive: Send + Sync {
    async fn touch(&self);
}
