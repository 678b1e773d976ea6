//! Codescout data layer for `PostgreSQL` state management
//!
//! Owns the relational record of repositories and their per-branch
//! indexes, the advisory locks that serialize index state transitions,
//! the durable background job queue, and the AEAD cipher for stored
//! repository tokens.

// Module declarations
pub mod crypto;
pub mod error;
pub mod job_queue;
pub mod lock;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod store;

pub mod mock;
pub use mock::{MockIndexStore, MockJobQueue};

// Public exports
pub use crypto::TokenCipher;
pub use error::{MetaDataError, MetaDataErrorExt, MetaDataResult};
pub use job_queue::{JobHandler, JobOutcome, JobQueue, PgJobQueue, QueueWorker};
pub use lock::{IndexLock, index_lock_key};
pub use migrations::run_migrations;
pub use models::{
    IndexStatus, JobData, JobState, NewRepoIndex, RepoIndex, RepoIndexPatch, Repository,
};
pub use pool::create_pool;
pub use store::{IndexStore, PgIndexStore};
