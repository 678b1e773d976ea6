//! Background job processing
//!
//! The queue delivers one `repo_index_id` per job. The handler clones the
//! repository into an isolated runtime it owns exclusively, re-runs the
//! strategy decision against that clone, drives the indexing engine with
//! progress and keepalive wired in, and reconciles the entity. The
//! runtime dies in finally-position no matter what.

use crate::error::{IndexingError, IndexingResult};
use crate::identity::sanitize_url;
use crate::indexing::indexer::{IndexParams, RepoIndexer};
use crate::indexing::{Keepalive, ProgressSink};
use crate::lifecycle::{IndexLifecycleManager, StoreProgress, Strategy};
use crate::runtime::{IsolatedRuntime, RuntimeProvider};
use async_trait::async_trait;
use codescout_meta_data::{
    IndexStatus, IndexStore, JobData, JobHandler, RepoIndex, RepoIndexPatch, TokenCipher,
};
use codescout_repo::{Git, clone_repository, shell_quote};
use std::sync::Arc;
use uuid::Uuid;

/// Consumes indexing jobs from the durable queue
pub struct IndexJobHandler {
    store: Arc<dyn IndexStore>,
    indexer: Arc<RepoIndexer>,
    lifecycle: Arc<IndexLifecycleManager>,
    runtimes: Arc<dyn RuntimeProvider>,
    cipher: Option<Arc<TokenCipher>>,
}

impl IndexJobHandler {
    pub fn new(
        store: Arc<dyn IndexStore>,
        indexer: Arc<RepoIndexer>,
        lifecycle: Arc<IndexLifecycleManager>,
        runtimes: Arc<dyn RuntimeProvider>,
        cipher: Option<Arc<TokenCipher>>,
    ) -> Self {
        Self {
            store,
            indexer,
            lifecycle,
            runtimes,
            cipher,
        }
    }

    async fn process(&self, data: JobData) -> IndexingResult<()> {
        let Some(entity) = self.store.get_index_by_id(data.repo_index_id).await? else {
            tracing::warn!(job_id = %data.repo_index_id, "Job for missing index, skipping");
            return Ok(());
        };
        if entity.status == IndexStatus::Completed {
            tracing::debug!(index_id = %entity.id, "Index already completed, skipping");
            return Ok(());
        }

        // Flip to in-progress; token counters carry over from the claim
        let entity = self
            .store
            .update_index(
                entity.id,
                RepoIndexPatch {
                    status: Some(IndexStatus::InProgress),
                    ..Default::default()
                },
            )
            .await?;

        let runtime = self
            .runtimes
            .provision(&format!("codescout-index-{}", entity.id))
            .await?;

        let result = self.run_in_runtime(&entity, Arc::clone(&runtime)).await;

        // The runtime belongs to this job alone; cleanup failures must
        // not mask the job result.
        if let Err(e) = runtime.destroy().await {
            tracing::warn!(index_id = %entity.id, error = %e, "Runtime cleanup failed");
        }

        result
    }

    async fn run_in_runtime(
        &self,
        entity: &RepoIndex,
        runtime: Arc<dyn IsolatedRuntime>,
    ) -> IndexingResult<()> {
        let exec = runtime.exec();
        let clone_path = format!("{}/repo", runtime.workspace());

        exec.exec(&format!("rm -rf {}", shell_quote(&clone_path)))
            .await?;

        let clone_url = self.authenticated_clone_url(entity).await?;
        tracing::info!(
            index_id = %entity.id,
            url = %sanitize_url(&clone_url),
            branch = %entity.branch,
            "Cloning for background index"
        );
        clone_repository(exec.as_ref(), &clone_url, Some(&entity.branch), &clone_path).await?;

        let git = Git::new(Arc::clone(&exec), clone_path);

        // Re-run the strategy decision against the actual clone; the
        // claim-time decision was made against the caller's tree.
        let decision = self
            .lifecycle
            .decide(
                &git,
                entity.repository_id,
                &entity.branch,
                &entity.repo_url,
                Some(entity),
            )
            .await?;

        if decision.ready {
            self.store
                .update_index(
                    entity.id,
                    RepoIndexPatch {
                        status: Some(IndexStatus::Completed),
                        clear_error: true,
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        let entity = self
            .store
            .update_index(
                entity.id,
                RepoIndexPatch {
                    collection: Some(decision.collection.clone()),
                    embedding_model: Some(decision.embedding_model.clone()),
                    vector_size: Some(decision.vector_size),
                    chunking_signature_hash: Some(decision.signature_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let progress: Arc<dyn ProgressSink> =
            Arc::new(StoreProgress::new(Arc::clone(&self.store), entity.id));
        let keepalive: Arc<dyn Keepalive> = Arc::new(RuntimeKeepalive { runtime });
        let params = IndexParams {
            repo_id: entity.repo_url.clone(),
            collection: entity.collection.clone(),
            commit: decision.current_commit.clone(),
            vector_size: decision.vector_size.max(0) as usize,
        };

        match &decision.strategy {
            Strategy::Full => {
                self.indexer
                    .run_full_index(&git, &params, Some(progress), Some(keepalive))
                    .await?;
            }
            Strategy::Incremental { from } => {
                self.indexer
                    .run_incremental_index(&git, &params, from, Some(progress), Some(keepalive))
                    .await?;
            }
        }

        let counted = self
            .store
            .get_index_by_id(entity.id)
            .await?
            .map_or(0, |row| row.indexed_tokens);
        self.store
            .update_index(
                entity.id,
                RepoIndexPatch {
                    status: Some(IndexStatus::Completed),
                    last_indexed_commit: Some(decision.current_commit),
                    estimated_tokens: Some(counted),
                    clear_error: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// The clone URL with the repository's stored token injected as the
    /// URL username. The raw URL never reaches a log line.
    async fn authenticated_clone_url(&self, entity: &RepoIndex) -> IndexingResult<String> {
        let repository = self.store.get_repository(entity.repository_id).await?;
        let token = match (repository.as_ref().and_then(|r| r.encrypted_token.as_ref()), &self.cipher) {
            (Some(sealed), Some(cipher)) => {
                let plain = cipher.decrypt(sealed)?;
                Some(String::from_utf8(plain).map_err(|_| {
                    IndexingError::Validation("decrypted token is not UTF-8".to_string())
                })?)
            }
            (Some(_), None) => {
                tracing::warn!(index_id = %entity.id, "Repository has a token but no cipher is configured");
                None
            }
            _ => None,
        };

        Ok(match token {
            Some(token) => inject_token(&entity.repo_url, &token),
            None => entity.repo_url.clone(),
        })
    }

    async fn reset_to_pending(&self, id: Uuid) {
        let result = self
            .store
            .update_index(
                id,
                RepoIndexPatch {
                    status: Some(IndexStatus::Pending),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            tracing::error!(index_id = %id, error = %e, "Failed to reset index to pending");
        }
    }
}

/// Bumps the runtime's last-used marker on every progress flush
struct RuntimeKeepalive {
    runtime: Arc<dyn IsolatedRuntime>,
}

#[async_trait]
impl Keepalive for RuntimeKeepalive {
    async fn touch(&self) {
        self.runtime.touch().await;
    }
}

fn inject_token(url: &str, token: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("https://{token}@{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("http://{token}@{rest}")
    } else {
        url.to_string()
    }
}

#[async_trait]
impl JobHandler for IndexJobHandler {
    async fn on_process(&self, data: JobData) -> anyhow::Result<()> {
        self.process(data).await?;
        Ok(())
    }

    async fn on_stalled(&self, id: Uuid) {
        tracing::warn!(index_id = %id, "Job stalled, resetting index to pending");
        self.reset_to_pending(id).await;
    }

    async fn on_retry(&self, id: Uuid, error: &str) {
        tracing::warn!(index_id = %id, error, "Job will retry, resetting index to pending");
        self.reset_to_pending(id).await;
    }

    async fn on_failed(&self, id: Uuid, error: &str) {
        let result = self
            .store
            .update_index(
                id,
                RepoIndexPatch {
                    status: Some(IndexStatus::Failed),
                    error_message: Some(error.to_string()),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            tracing::error!(index_id = %id, error = %e, "Failed to mark index as failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_token() {
        assert_eq!(
            inject_token("https://github.com/o/r", "tok123"),
            "https://tok123@github.com/o/r"
        );
        assert_eq!(
            inject_token("http://git.local/o/r", "t"),
            "http://t@git.local/o/r"
        );
        // Non-HTTP URLs pass through untouched
        assert_eq!(inject_token("file:///tmp/repo", "t"), "file:///tmp/repo");
    }

    #[test]
    fn test_injected_token_sanitizes_away() {
        let url = inject_token("https://github.com/o/r", "secret");
        assert_eq!(sanitize_url(&url), "https://github.com/o/r");
    }
}
