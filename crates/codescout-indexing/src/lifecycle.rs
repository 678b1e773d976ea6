//! Index lifecycle management
//!
//! Exclusive owner of `RepoIndex.status`. Per-key advisory locks
//! serialize claims, so two concurrent callers for the same
//! `(repository, branch)` either observe an in-flight run or find the
//! row already claimed. Small trees index inline on the caller's task;
//! everything else goes to the durable queue.

use crate::error::{IndexingError, IndexingResult};
use crate::identity::{
    build_collection_name, derive_branch_slug, derive_repo_id, derive_repo_slug, parse_owner_repo,
};
use crate::indexing::ProgressSink;
use crate::indexing::indexer::{IndexParams, RepoIndexer};
use async_trait::async_trait;
use codescout_meta_data::{
    IndexStatus, IndexStore, JobData, JobQueue, NewRepoIndex, RepoIndex, RepoIndexPatch,
};
use codescout_repo::{Git, RepoExec};
use codescout_search::{QueryId, SearchHit, SearchRequest, SearchService};
use codescout_vector_data::VectorStore;
use std::sync::Arc;
use uuid::Uuid;

/// Externally observable index state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Index matches the current commit and configuration
    Ready,
    /// A background job is queued
    Pending,
    /// An indexing run is live
    InProgress,
}

/// Result of `get_or_init_index`
#[derive(Debug, Clone)]
pub struct IndexHandle {
    pub state: IndexState,
    pub entity: RepoIndex,
}

/// One caller request to resolve an index
pub struct GetOrInitRequest {
    pub repository_id: Uuid,
    pub repo_url: String,
    pub repo_root: String,
    pub branch: String,
    pub exec: Arc<dyn RepoExec>,
    pub user_id: Option<String>,
}

/// A search request resolved against the index record
#[derive(Debug, Clone)]
pub struct CodebaseSearchRequest {
    pub repository_id: Uuid,
    pub branch: String,
    pub query: String,
    pub top_k: usize,
    pub directory_filter: Option<String>,
    pub language_filter: Option<String>,
}

/// Search results, flagged partial while indexing is still running
#[derive(Debug, Clone)]
pub struct CodebaseSearchOutcome {
    pub hits: Vec<SearchHit>,
    pub partial: bool,
}

/// How the next run will cover the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    Full,
    Incremental { from: String },
}

/// Everything the strategy decision derives from the working tree and
/// the existing row
pub(crate) struct Decision {
    pub ready: bool,
    pub current_commit: String,
    pub collection: String,
    pub embedding_model: String,
    pub vector_size: i32,
    pub signature_hash: String,
    pub strategy: Strategy,
    pub estimated_tokens: i64,
    pub carried_tokens: i64,
    pub repo_url: String,
}

enum Claim {
    AlreadyRunning(RepoIndex),
    Ready(RepoIndex),
    Run {
        entity: RepoIndex,
        strategy: Strategy,
        current_commit: String,
    },
}

/// Progress sink bound to one index row; each report is an atomic
/// DB-side increment
pub struct StoreProgress {
    store: Arc<dyn IndexStore>,
    index_id: Uuid,
}

impl StoreProgress {
    pub fn new(store: Arc<dyn IndexStore>, index_id: Uuid) -> Self {
        Self { store, index_id }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn add_tokens(&self, tokens: i64) {
        if tokens <= 0 {
            return;
        }
        if let Err(e) = self.store.increment_indexed_tokens(self.index_id, tokens).await {
            tracing::warn!(index_id = %self.index_id, error = %e, "Progress increment failed");
        }
    }
}

/// Orchestrates index state across the store, the queue, the vector
/// store, and the indexing engine
pub struct IndexLifecycleManager {
    store: Arc<dyn IndexStore>,
    queue: Arc<dyn JobQueue>,
    vectors: Arc<dyn VectorStore>,
    indexer: Arc<RepoIndexer>,
    search: Arc<SearchService>,
    inline_threshold_tokens: i64,
}

impl IndexLifecycleManager {
    pub fn new(
        store: Arc<dyn IndexStore>,
        queue: Arc<dyn JobQueue>,
        vectors: Arc<dyn VectorStore>,
        indexer: Arc<RepoIndexer>,
        search: Arc<SearchService>,
        inline_threshold_tokens: i64,
    ) -> Self {
        Self {
            store,
            queue,
            vectors,
            indexer,
            search,
            inline_threshold_tokens,
        }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn indexer(&self) -> &Arc<RepoIndexer> {
        &self.indexer
    }

    /// Resolve the index for a `(repository, branch)` pair, starting an
    /// indexing run if the index is absent, stale, or misconfigured.
    ///
    /// Small estimated workloads run inline before returning `Ready`;
    /// larger ones are queued and return `Pending`.
    ///
    /// # Errors
    ///
    /// Propagates claim failures and inline run failures (the entity is
    /// flipped to `Failed` first).
    #[tracing::instrument(skip(self, request), fields(branch = %request.branch))]
    pub async fn get_or_init_index(
        &self,
        request: &GetOrInitRequest,
    ) -> IndexingResult<IndexHandle> {
        let repository_id = self.resolve_repository_id(request).await;
        let git = Git::new(Arc::clone(&request.exec), request.repo_root.clone());

        let lock = self
            .store
            .acquire_index_lock(repository_id, &request.branch)
            .await?;
        let claim = self
            .claim_index_slot(&git, repository_id, &request.branch, &request.repo_url)
            .await;
        lock.release().await;

        match claim? {
            Claim::AlreadyRunning(entity) => {
                let state = if entity.status == IndexStatus::Pending {
                    IndexState::Pending
                } else {
                    IndexState::InProgress
                };
                Ok(IndexHandle { state, entity })
            }
            Claim::Ready(entity) => Ok(IndexHandle {
                state: IndexState::Ready,
                entity,
            }),
            Claim::Run {
                entity,
                strategy,
                current_commit,
            } => {
                if entity.estimated_tokens <= self.inline_threshold_tokens {
                    self.run_inline(&git, entity, strategy, current_commit).await
                } else {
                    let entity = self
                        .store
                        .update_index(
                            entity.id,
                            RepoIndexPatch {
                                status: Some(IndexStatus::Pending),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.queue
                        .add_job(&JobData {
                            repo_index_id: entity.id,
                            repo_url: entity.repo_url.clone(),
                            branch: entity.branch.clone(),
                        })
                        .await?;
                    Ok(IndexHandle {
                        state: IndexState::Pending,
                        entity,
                    })
                }
            }
        }
    }

    /// Search an indexed codebase, flagging results partial while a run
    /// is still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`IndexingError::NotFound`] for an unknown pair and
    /// [`IndexingError::Conflict`] when the index is `Failed`.
    pub async fn search_codebase(
        &self,
        request: &CodebaseSearchRequest,
    ) -> IndexingResult<CodebaseSearchOutcome> {
        let entity = self
            .store
            .get_index(request.repository_id, &request.branch)
            .await?
            .ok_or_else(|| {
                IndexingError::NotFound(format!(
                    "index for {}:{}",
                    request.repository_id, request.branch
                ))
            })?;

        if entity.status == IndexStatus::Failed {
            return Err(IndexingError::Conflict(format!(
                "index failed: {}",
                entity.error_message.as_deref().unwrap_or("unknown error")
            )));
        }

        let hits = self
            .search
            .search(
                &SearchRequest {
                    collection: entity.collection.clone(),
                    query: request.query.clone(),
                    repo_id: entity.repo_url.clone(),
                    top_k: request.top_k,
                    directory_filter: request.directory_filter.clone(),
                    language_filter: request.language_filter.clone(),
                },
                QueryId::new(),
            )
            .await
            .map_err(|e| IndexingError::Internal(e.to_string()))?;

        Ok(CodebaseSearchOutcome {
            partial: entity.status != IndexStatus::Completed,
            hits,
        })
    }

    /// Force a fresh full index. A live run is a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`IndexingError::Conflict`] when a run is pending or in
    /// progress, [`IndexingError::NotFound`] for an unknown pair.
    pub async fn trigger_reindex(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> IndexingResult<RepoIndex> {
        let entity = self
            .store
            .get_index(repository_id, branch)
            .await?
            .ok_or_else(|| {
                IndexingError::NotFound(format!("index for {repository_id}:{branch}"))
            })?;

        if matches!(entity.status, IndexStatus::Pending | IndexStatus::InProgress) {
            return Err(IndexingError::Conflict(
                "indexing already in progress".to_string(),
            ));
        }

        let entity = self
            .store
            .update_index(
                entity.id,
                RepoIndexPatch {
                    status: Some(IndexStatus::Pending),
                    clear_last_indexed_commit: true,
                    clear_error: true,
                    ..Default::default()
                },
            )
            .await?;
        self.queue
            .add_job(&JobData {
                repo_index_id: entity.id,
                repo_url: entity.repo_url.clone(),
                branch: entity.branch.clone(),
            })
            .await?;
        Ok(entity)
    }

    /// Drop one branch index: its collection, queued job, and row.
    ///
    /// # Errors
    ///
    /// Propagates store failures; a missing row is a no-op.
    pub async fn drop_index(&self, repository_id: Uuid, branch: &str) -> IndexingResult<()> {
        let Some(entity) = self.store.get_index(repository_id, branch).await? else {
            return Ok(());
        };
        if let Err(e) = self.vectors.delete_collection(&entity.collection).await {
            tracing::warn!(collection = %entity.collection, error = %e, "Collection delete failed");
        }
        self.queue.remove_job(entity.id).await?;
        self.store.delete_index(entity.id).await?;
        Ok(())
    }

    /// Cascade a repository deletion: every branch index row goes, along
    /// with its vector collection and any queued job.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn delete_repository_cascade(&self, repository_id: Uuid) -> IndexingResult<()> {
        let removed = self.store.delete_repository(repository_id).await?;
        for entity in removed {
            if let Err(e) = self.vectors.delete_collection(&entity.collection).await {
                tracing::warn!(collection = %entity.collection, error = %e, "Collection delete failed");
            }
            if let Err(e) = self.queue.remove_job(entity.id).await {
                tracing::warn!(job_id = %entity.id, error = %e, "Job removal failed");
            }
        }
        Ok(())
    }

    /// At boot, rows stuck in `Pending`/`InProgress` belong to runs that
    /// died with the previous process. Reset and re-enqueue them.
    /// Failures are logged; startup proceeds regardless.
    pub async fn recover_on_startup(&self) {
        let stuck = match self
            .store
            .list_indexes_in_statuses(&[IndexStatus::Pending, IndexStatus::InProgress])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Startup recovery scan failed");
                return;
            }
        };

        for row in stuck {
            let recovered: IndexingResult<()> = async {
                self.store
                    .update_index(
                        row.id,
                        RepoIndexPatch {
                            status: Some(IndexStatus::Pending),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.queue
                    .add_job(&JobData {
                        repo_index_id: row.id,
                        repo_url: row.repo_url.clone(),
                        branch: row.branch.clone(),
                    })
                    .await?;
                Ok(())
            }
            .await;

            match recovered {
                Ok(()) => {
                    tracing::info!(index_id = %row.id, branch = %row.branch, "Recovered orphaned index")
                }
                Err(e) => {
                    tracing::error!(index_id = %row.id, error = %e, "Index recovery failed")
                }
            }
        }
    }

    /// Map the caller's repository id to the canonical row when the URL
    /// parses and the row exists for this user
    async fn resolve_repository_id(&self, request: &GetOrInitRequest) -> Uuid {
        if let Some(user) = &request.user_id
            && let Some((owner, repo, provider)) = parse_owner_repo(&derive_repo_id(&request.repo_url))
            && let Ok(Some(row)) = self
                .store
                .find_repository(&owner, &repo, user, &provider)
                .await
        {
            return row.id;
        }
        request.repository_id
    }

    /// The atomic claim, run under the advisory lock
    async fn claim_index_slot(
        &self,
        git: &Git,
        repository_id: Uuid,
        branch: &str,
        caller_url: &str,
    ) -> IndexingResult<Claim> {
        let existing = self.store.get_index(repository_id, branch).await?;

        if let Some(entity) = &existing
            && matches!(entity.status, IndexStatus::Pending | IndexStatus::InProgress)
        {
            return Ok(Claim::AlreadyRunning(entity.clone()));
        }

        let decision = self
            .decide(git, repository_id, branch, caller_url, existing.as_ref())
            .await?;

        if decision.ready
            && let Some(entity) = existing.clone()
        {
            return Ok(Claim::Ready(entity));
        }

        let entity = match existing {
            Some(entity) => {
                self.store
                    .update_index(
                        entity.id,
                        RepoIndexPatch {
                            status: Some(IndexStatus::InProgress),
                            repo_url: Some(decision.repo_url.clone()),
                            collection: Some(decision.collection.clone()),
                            embedding_model: Some(decision.embedding_model.clone()),
                            vector_size: Some(decision.vector_size),
                            chunking_signature_hash: Some(decision.signature_hash.clone()),
                            estimated_tokens: Some(decision.estimated_tokens),
                            indexed_tokens: Some(decision.carried_tokens),
                            clear_error: true,
                            ..Default::default()
                        },
                    )
                    .await?
            }
            None => {
                self.store
                    .create_index(NewRepoIndex {
                        repository_id,
                        repo_url: decision.repo_url.clone(),
                        branch: branch.to_string(),
                        status: IndexStatus::InProgress,
                        collection: decision.collection.clone(),
                        last_indexed_commit: None,
                        embedding_model: Some(decision.embedding_model.clone()),
                        vector_size: Some(decision.vector_size),
                        chunking_signature_hash: Some(decision.signature_hash.clone()),
                        estimated_tokens: decision.estimated_tokens,
                        indexed_tokens: decision.carried_tokens,
                    })
                    .await?
            }
        };

        Ok(Claim::Run {
            entity,
            strategy: decision.strategy,
            current_commit: decision.current_commit,
        })
    }

    /// The §strategy decision: ready check, full-versus-incremental,
    /// cross-branch seeding, token estimation. Shared with the
    /// background worker, which re-runs it against its clone.
    pub(crate) async fn decide(
        &self,
        git: &Git,
        repository_id: Uuid,
        branch: &str,
        caller_url: &str,
        existing: Option<&RepoIndex>,
    ) -> IndexingResult<Decision> {
        let repo_url = existing.map_or_else(
            || derive_repo_id(caller_url),
            |entity| entity.repo_url.clone(),
        );

        let embedding_model = self.indexer.settings().embedding_model.clone();
        let vector_size = self.indexer.vector_size_for(&embedding_model).await?;
        let signature_hash = self.indexer.chunking_signature_hash();
        let collection = build_collection_name(
            &derive_repo_slug(&repo_url),
            vector_size,
            Some(&derive_branch_slug(branch)),
        );
        let current_commit = git.rev_parse_head().await?;

        let metadata_matches = existing.is_some_and(|entity| {
            entity.embedding_model.as_deref() == Some(embedding_model.as_str())
                && entity.vector_size == Some(vector_size as i32)
                && entity.chunking_signature_hash.as_deref() == Some(signature_hash.as_str())
        });

        let ready = existing.is_some_and(|entity| {
            entity.status == IndexStatus::Completed
                && entity.last_indexed_commit.as_deref() == Some(current_commit.as_str())
        }) && metadata_matches;

        let mut needs_full = existing.is_none_or(|entity| {
            entity.status == IndexStatus::Failed
                || entity.last_indexed_commit.is_none()
                || !metadata_matches
        });

        // Cross-branch seeding: a fresh branch bootstraps from the most
        // recently updated completed sibling, then reconciles
        // incrementally from the donor's commit.
        let mut donor_commit: Option<String> = None;
        let never_indexed = existing.is_none_or(|e| e.last_indexed_commit.is_none());
        if needs_full && never_indexed {
            if let Some(donor) = self.find_donor(repository_id, branch, existing).await? {
                let donor_collection = donor.collection.clone();
                match self
                    .indexer
                    .copy_collection_points(&donor_collection, &collection)
                    .await
                {
                    Ok(copied) if copied > 0 => {
                        tracing::info!(
                            donor_branch = %donor.branch,
                            copied,
                            "Seeded collection from sibling branch"
                        );
                        donor_commit = donor.last_indexed_commit.clone();
                        needs_full = false;
                    }
                    Ok(_) => {
                        tracing::debug!(donor_branch = %donor.branch, "Donor collection empty, full index");
                    }
                    Err(e) => {
                        tracing::warn!(donor_branch = %donor.branch, error = %e, "Seeding failed, full index");
                    }
                }
            }
        }

        let base_commit = existing
            .and_then(|e| e.last_indexed_commit.clone())
            .or(donor_commit);

        let strategy = match (needs_full, base_commit) {
            (false, Some(from)) => Strategy::Incremental { from },
            _ => Strategy::Full,
        };

        let estimated_tokens = match &strategy {
            Strategy::Full => self.indexer.estimate_total_tokens(git).await,
            Strategy::Incremental { from } => {
                self.indexer
                    .estimate_changed_tokens(git, from, &current_commit)
                    .await
            }
        };

        // Carrying over a previous total keeps the progress bar
        // meaningful: it restarts near the end, not at zero.
        let carried_tokens = match (&strategy, existing) {
            (Strategy::Incremental { .. }, Some(entity)) if entity.indexed_tokens > 0 => {
                entity.indexed_tokens.saturating_sub(estimated_tokens).max(0)
            }
            _ => 0,
        };

        Ok(Decision {
            ready,
            current_commit,
            collection,
            embedding_model,
            vector_size: vector_size as i32,
            signature_hash,
            strategy,
            estimated_tokens,
            carried_tokens,
            repo_url,
        })
    }

    /// Most recently updated completed sibling index with a known commit
    async fn find_donor(
        &self,
        repository_id: Uuid,
        branch: &str,
        existing: Option<&RepoIndex>,
    ) -> IndexingResult<Option<RepoIndex>> {
        let siblings = self.store.list_indexes_for_repository(repository_id).await?;
        Ok(siblings.into_iter().find(|candidate| {
            candidate.branch != branch
                && existing.is_none_or(|e| e.id != candidate.id)
                && candidate.status == IndexStatus::Completed
                && candidate.last_indexed_commit.is_some()
        }))
    }

    /// Inline path: run on the caller's task, reconcile the entity, and
    /// hand back a ready index
    async fn run_inline(
        &self,
        git: &Git,
        entity: RepoIndex,
        strategy: Strategy,
        current_commit: String,
    ) -> IndexingResult<IndexHandle> {
        let progress: Arc<dyn ProgressSink> =
            Arc::new(StoreProgress::new(Arc::clone(&self.store), entity.id));
        let params = IndexParams {
            repo_id: entity.repo_url.clone(),
            collection: entity.collection.clone(),
            commit: current_commit.clone(),
            vector_size: entity.vector_size.unwrap_or(0).max(0) as usize,
        };

        let run = match &strategy {
            Strategy::Full => {
                self.indexer
                    .run_full_index(git, &params, Some(progress), None)
                    .await
            }
            Strategy::Incremental { from } => {
                self.indexer
                    .run_incremental_index(git, &params, from, Some(progress), None)
                    .await
            }
        };

        match run {
            Ok(_) => {
                let counted = self
                    .store
                    .get_index_by_id(entity.id)
                    .await?
                    .map_or(0, |row| row.indexed_tokens);
                // Final reconciliation: the estimate becomes the truth
                let entity = self
                    .store
                    .update_index(
                        entity.id,
                        RepoIndexPatch {
                            status: Some(IndexStatus::Completed),
                            last_indexed_commit: Some(current_commit),
                            estimated_tokens: Some(counted),
                            clear_error: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(IndexHandle {
                    state: IndexState::Ready,
                    entity,
                })
            }
            Err(e) => {
                let _ = self
                    .store
                    .update_index(
                        entity.id,
                        RepoIndexPatch {
                            status: Some(IndexStatus::Failed),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }
}
