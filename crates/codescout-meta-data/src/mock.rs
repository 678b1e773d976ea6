//! In-memory implementations of [`IndexStore`] and [`JobQueue`] for tests
//!
//! Behaviorally faithful where the lifecycle logic depends on it: unique
//! `(repository, branch)` rows, atomic counter increments, real mutual
//! exclusion on the per-key index lock, and idempotent job enqueueing.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{MetaDataError, MetaDataResult};
use crate::job_queue::JobQueue;
use crate::lock::{IndexLock, index_lock_key};
use crate::models::{IndexStatus, JobData, JobState, NewRepoIndex, RepoIndex, RepoIndexPatch, Repository};
use crate::store::IndexStore;

/// In-memory index store
#[derive(Default)]
pub struct MockIndexStore {
    indexes: Mutex<HashMap<Uuid, RepoIndex>>,
    repositories: Mutex<HashMap<Uuid, Repository>>,
    locks: DashMap<i64, Arc<AsyncMutex<()>>>,
}

impl MockIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a repository row (tests stand in for the external API layer)
    pub fn add_repository(&self, repository: Repository) {
        self.repositories
            .lock()
            .unwrap()
            .insert(repository.id, repository);
    }

    /// Snapshot of all index rows
    pub fn all_indexes(&self) -> Vec<RepoIndex> {
        self.indexes.lock().unwrap().values().cloned().collect()
    }
}

fn apply_patch(row: &mut RepoIndex, patch: RepoIndexPatch) {
    if let Some(status) = patch.status {
        row.status = status;
    }
    if let Some(repo_url) = patch.repo_url {
        row.repo_url = repo_url;
    }
    if let Some(collection) = patch.collection {
        row.collection = collection;
    }
    if patch.clear_last_indexed_commit {
        row.last_indexed_commit = None;
    } else if let Some(commit) = patch.last_indexed_commit {
        row.last_indexed_commit = Some(commit);
    }
    if let Some(model) = patch.embedding_model {
        row.embedding_model = Some(model);
    }
    if let Some(size) = patch.vector_size {
        row.vector_size = Some(size);
    }
    if let Some(hash) = patch.chunking_signature_hash {
        row.chunking_signature_hash = Some(hash);
    }
    if let Some(estimated) = patch.estimated_tokens {
        row.estimated_tokens = estimated;
    }
    if let Some(indexed) = patch.indexed_tokens {
        row.indexed_tokens = indexed;
    }
    if patch.clear_error {
        row.error_message = None;
    } else if let Some(message) = patch.error_message {
        row.error_message = Some(message);
    }
    row.updated_at = Utc::now();
}

#[async_trait]
impl IndexStore for MockIndexStore {
    async fn get_index(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Option<RepoIndex>> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .values()
            .find(|i| i.repository_id == repository_id && i.branch == branch)
            .cloned())
    }

    async fn get_index_by_id(&self, id: Uuid) -> MetaDataResult<Option<RepoIndex>> {
        Ok(self.indexes.lock().unwrap().get(&id).cloned())
    }

    async fn list_indexes_for_repository(
        &self,
        repository_id: Uuid,
    ) -> MetaDataResult<Vec<RepoIndex>> {
        let mut rows: Vec<RepoIndex> = self
            .indexes
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.repository_id == repository_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn list_indexes_in_statuses(
        &self,
        statuses: &[IndexStatus],
    ) -> MetaDataResult<Vec<RepoIndex>> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .values()
            .filter(|i| statuses.contains(&i.status))
            .cloned()
            .collect())
    }

    async fn create_index(&self, new: NewRepoIndex) -> MetaDataResult<RepoIndex> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes
            .values()
            .any(|i| i.repository_id == new.repository_id && i.branch == new.branch)
        {
            return Err(MetaDataError::Conflict(format!(
                "index already exists for {}:{}",
                new.repository_id, new.branch
            )));
        }

        let now = Utc::now();
        let row = RepoIndex {
            id: Uuid::new_v4(),
            repository_id: new.repository_id,
            repo_url: new.repo_url,
            branch: new.branch,
            status: new.status,
            collection: new.collection,
            last_indexed_commit: new.last_indexed_commit,
            embedding_model: new.embedding_model,
            vector_size: new.vector_size,
            chunking_signature_hash: new.chunking_signature_hash,
            estimated_tokens: new.estimated_tokens,
            indexed_tokens: new.indexed_tokens,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        indexes.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_index(&self, id: Uuid, patch: RepoIndexPatch) -> MetaDataResult<RepoIndex> {
        let mut indexes = self.indexes.lock().unwrap();
        let row = indexes
            .get_mut(&id)
            .ok_or_else(|| MetaDataError::NotFound(format!("repo_index {id}")))?;
        apply_patch(row, patch);
        Ok(row.clone())
    }

    async fn delete_index(&self, id: Uuid) -> MetaDataResult<()> {
        self.indexes.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn increment_indexed_tokens(&self, id: Uuid, amount: i64) -> MetaDataResult<()> {
        let mut indexes = self.indexes.lock().unwrap();
        let row = indexes
            .get_mut(&id)
            .ok_or_else(|| MetaDataError::NotFound(format!("repo_index {id}")))?;
        row.indexed_tokens = row.indexed_tokens.saturating_add(amount);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn acquire_index_lock(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Box<dyn IndexLock>> {
        let key = index_lock_key(&repository_id, branch);
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        Ok(Box::new(MockLockGuard { _guard: guard }))
    }

    async fn get_repository(&self, id: Uuid) -> MetaDataResult<Option<Repository>> {
        Ok(self.repositories.lock().unwrap().get(&id).cloned())
    }

    async fn find_repository(
        &self,
        owner: &str,
        repo: &str,
        created_by: &str,
        provider: &str,
    ) -> MetaDataResult<Option<Repository>> {
        Ok(self
            .repositories
            .lock()
            .unwrap()
            .values()
            .find(|r| {
                r.owner == owner
                    && r.repo == repo
                    && r.created_by == created_by
                    && r.provider == provider
            })
            .cloned())
    }

    async fn delete_repository(&self, id: Uuid) -> MetaDataResult<Vec<RepoIndex>> {
        self.repositories.lock().unwrap().remove(&id);
        let mut indexes = self.indexes.lock().unwrap();
        let removed: Vec<RepoIndex> = indexes
            .values()
            .filter(|i| i.repository_id == id)
            .cloned()
            .collect();
        indexes.retain(|_, i| i.repository_id != id);
        Ok(removed)
    }
}

struct MockLockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl IndexLock for MockLockGuard {
    async fn release(self: Box<Self>) {
        // Guard drops here
    }
}

/// In-memory job queue recording enqueue order
#[derive(Default)]
pub struct MockJobQueue {
    jobs: Mutex<Vec<JobData>>,
    states: Mutex<HashMap<Uuid, JobState>>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs in enqueue order
    pub fn jobs(&self) -> Vec<JobData> {
        self.jobs.lock().unwrap().clone()
    }

    /// Force a job state (simulating worker progress)
    pub fn set_state(&self, id: Uuid, state: JobState) {
        self.states.lock().unwrap().insert(id, state);
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn add_job(&self, data: &JobData) -> MetaDataResult<()> {
        let mut states = self.states.lock().unwrap();
        match states.get(&data.repo_index_id) {
            Some(JobState::Waiting | JobState::Delayed) => return Ok(()),
            Some(JobState::Active) => return Ok(()),
            _ => {}
        }
        states.insert(data.repo_index_id, JobState::Waiting);
        self.jobs.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> MetaDataResult<()> {
        let mut states = self.states.lock().unwrap();
        if states.get(&id) != Some(&JobState::Active) {
            states.remove(&id);
            self.jobs.lock().unwrap().retain(|j| j.repo_index_id != id);
        }
        Ok(())
    }

    async fn job_state(&self, id: Uuid) -> MetaDataResult<Option<JobState>> {
        Ok(self.states.lock().unwrap().get(&id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn new_index(repo: Uuid, branch: &str) -> NewRepoIndex {
        NewRepoIndex {
            repository_id: repo,
            repo_url: "https://github.com/acme/app".to_string(),
            branch: branch.to_string(),
            status: IndexStatus::InProgress,
            collection: "codebase_acme_app_main_768".to_string(),
            last_indexed_commit: None,
            embedding_model: Some("test-model".to_string()),
            vector_size: Some(768),
            chunking_signature_hash: Some("abc".to_string()),
            estimated_tokens: 100,
            indexed_tokens: 0,
        }
    }

    #[tokio::test]
    async fn test_unique_per_repo_branch() {
        let store = MockIndexStore::new();
        let repo = Uuid::new_v4();
        store.create_index(new_index(repo, "main")).await.unwrap();
        assert!(store.create_index(new_index(repo, "main")).await.is_err());
        assert!(store.create_index(new_index(repo, "dev")).await.is_ok());
    }

    #[tokio::test]
    async fn test_increment_is_cumulative() {
        let store = MockIndexStore::new();
        let repo = Uuid::new_v4();
        let row = store.create_index(new_index(repo, "main")).await.unwrap();
        store.increment_indexed_tokens(row.id, 10).await.unwrap();
        store.increment_indexed_tokens(row.id, 5).await.unwrap();
        let row = store.get_index_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(row.indexed_tokens, 15);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let store = Arc::new(MockIndexStore::new());
        let repo = Uuid::new_v4();

        let lock = store.acquire_index_lock(repo, "main").await.unwrap();

        // Second acquire on the same key must block until release
        let store_clone = Arc::clone(&store);
        let contender = tokio::spawn(async move {
            let lock = store_clone.acquire_index_lock(repo, "main").await.unwrap();
            lock.release().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished(), "second acquire should be blocked");

        lock.release().await;
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_job_queue_idempotent_add() {
        let queue = MockJobQueue::new();
        let data = JobData {
            repo_index_id: Uuid::new_v4(),
            repo_url: "https://github.com/acme/app".to_string(),
            branch: "main".to_string(),
        };
        queue.add_job(&data).await.unwrap();
        queue.add_job(&data).await.unwrap();
        assert_eq!(queue.jobs().len(), 1);

        // Terminal state allows re-add
        queue.set_state(data.repo_index_id, JobState::Completed);
        queue.add_job(&data).await.unwrap();
        assert_eq!(queue.jobs().len(), 2);
    }
}
