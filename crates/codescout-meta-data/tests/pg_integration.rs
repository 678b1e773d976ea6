//! Integration tests against a real `PostgreSQL` instance
//!
//! Ignored by default; run with `cargo test -- --ignored` once
//! `DATABASE_URL`-style settings point at a disposable database:
//!
//! ```sh
//! docker run -d -p 5432:5432 -e POSTGRES_USER=codescout \
//!   -e POSTGRES_PASSWORD=localdev123 -e POSTGRES_DB=codescout postgres:16
//! ```

#![allow(clippy::unwrap_used)]

use codescout_config::{DatabaseConfig, QueueConfig};
use codescout_meta_data::{
    IndexStatus, IndexStore, JobData, JobHandler, JobQueue, JobState, NewRepoIndex, PgIndexStore,
    PgJobQueue, QueueWorker, RepoIndexPatch, create_pool, run_migrations,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let pool = create_pool(&DatabaseConfig::from_env())
        .await
        .expect("PostgreSQL must be reachable for ignored integration tests");
    run_migrations(&pool).await.unwrap();
    pool
}

fn new_index(repository_id: Uuid, branch: &str) -> NewRepoIndex {
    NewRepoIndex {
        repository_id,
        repo_url: "https://github.com/acme/app".to_string(),
        branch: branch.to_string(),
        status: IndexStatus::InProgress,
        collection: "codebase_acme_app_main_768".to_string(),
        last_indexed_commit: None,
        embedding_model: Some("test-model".to_string()),
        vector_size: Some(768),
        chunking_signature_hash: Some("sig".to_string()),
        estimated_tokens: 1000,
        indexed_tokens: 0,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_index_row_round_trip() {
    let store = PgIndexStore::new(test_pool().await);
    let repository_id = Uuid::new_v4();

    let created = store.create_index(new_index(repository_id, "main")).await.unwrap();
    assert_eq!(created.status, IndexStatus::InProgress);

    let fetched = store.get_index(repository_id, "main").await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);

    let updated = store
        .update_index(
            created.id,
            RepoIndexPatch {
                status: Some(IndexStatus::Completed),
                last_indexed_commit: Some("abc123".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, IndexStatus::Completed);
    assert_eq!(updated.last_indexed_commit.as_deref(), Some("abc123"));

    store.delete_index(created.id).await.unwrap();
    assert!(store.get_index(repository_id, "main").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_increment_indexed_tokens_is_atomic_under_concurrency() {
    let store = Arc::new(PgIndexStore::new(test_pool().await));
    let repository_id = Uuid::new_v4();
    let row = store.create_index(new_index(repository_id, "main")).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        let id = row.id;
        tasks.spawn(async move {
            for _ in 0..10 {
                store.increment_indexed_tokens(id, 7).await.unwrap();
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let row = store.get_index_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(row.indexed_tokens, 700);

    store.delete_index(row.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_advisory_lock_serializes_claims() {
    let store = Arc::new(PgIndexStore::new(test_pool().await));
    let repository_id = Uuid::new_v4();

    let lock = store.acquire_index_lock(repository_id, "main").await.unwrap();

    let store_clone = Arc::clone(&store);
    let contender = tokio::spawn(async move {
        let lock = store_clone
            .acquire_index_lock(repository_id, "main")
            .await
            .unwrap();
        lock.release().await;
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!contender.is_finished(), "lock must block the second claimant");

    lock.release().await;
    tokio::time::timeout(std::time::Duration::from_secs(5), contender)
        .await
        .unwrap()
        .unwrap();
}

struct CountingHandler {
    processed: AtomicUsize,
    fail_first: AtomicUsize,
}

#[async_trait::async_trait]
impl JobHandler for CountingHandler {
    async fn on_process(&self, _data: JobData) -> anyhow::Result<()> {
        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("synthetic failure");
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stalled(&self, _id: Uuid) {}
    async fn on_retry(&self, _id: Uuid, _error: &str) {}
    async fn on_failed(&self, _id: Uuid, _error: &str) {}
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_queue_add_claim_complete() {
    let pool = test_pool().await;
    let mut config = QueueConfig::from_env();
    config.backoff_base_ms = 10;
    let queue = Arc::new(PgJobQueue::new(pool, config.clone()));

    let data = JobData {
        repo_index_id: Uuid::new_v4(),
        repo_url: "https://github.com/acme/app".to_string(),
        branch: "main".to_string(),
    };
    queue.add_job(&data).await.unwrap();
    queue.add_job(&data).await.unwrap(); // idempotent
    assert_eq!(
        queue.job_state(data.repo_index_id).await.unwrap(),
        Some(JobState::Waiting)
    );

    let handler = Arc::new(CountingHandler {
        processed: AtomicUsize::new(0),
        fail_first: AtomicUsize::new(0),
    });
    let worker = QueueWorker::new(Arc::clone(&queue), Arc::clone(&handler) as _, config);

    let processed = worker.process_one().await.unwrap();
    assert_eq!(processed, Some(data.repo_index_id));
    assert_eq!(handler.processed.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.job_state(data.repo_index_id).await.unwrap(),
        Some(JobState::Completed)
    );

    queue.remove_job(data.repo_index_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_queue_retries_then_fails() {
    let pool = test_pool().await;
    let mut config = QueueConfig::from_env();
    config.attempts = 2;
    config.backoff_base_ms = 10;
    let queue = Arc::new(PgJobQueue::new(pool, config.clone()));

    let data = JobData {
        repo_index_id: Uuid::new_v4(),
        repo_url: "https://github.com/acme/app".to_string(),
        branch: "main".to_string(),
    };
    queue.add_job(&data).await.unwrap();

    let handler = Arc::new(CountingHandler {
        processed: AtomicUsize::new(0),
        fail_first: AtomicUsize::new(usize::MAX),
    });
    let worker = QueueWorker::new(Arc::clone(&queue), Arc::clone(&handler) as _, config);

    // First delivery fails and is delayed for retry
    worker.process_one().await.unwrap();
    let state = queue.job_state(data.repo_index_id).await.unwrap();
    assert!(matches!(state, Some(JobState::Delayed | JobState::Waiting)));

    // Wait out the backoff, then the final attempt fails for good
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    worker.process_one().await.unwrap();
    assert_eq!(
        queue.job_state(data.repo_index_id).await.unwrap(),
        Some(JobState::Failed)
    );

    queue.remove_job(data.repo_index_id).await.unwrap();
}
