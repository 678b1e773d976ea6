//! Pure indexing engine
//!
//! Turns one working-tree state into vector points: walk tracked files,
//! filter by ignore rules, deduplicate work via content hashes, chunk by
//! token window, embed in batches with bounded concurrency, and upsert or
//! delete against the vector store. Holds no index-row state; the
//! lifecycle layer owns status transitions.

use crate::chunking::{Chunk, Chunker};
use crate::error::{IndexingError, IndexingResult};
use crate::indexing::{Keepalive, ProgressSink};
use crate::signature::ChunkingSignature;
use chrono::Utc;
use codescout_common::sha1_hex;
use codescout_config::ApplicationConfig;
use codescout_embeddings::{EmbeddingError, EmbeddingProvider, TokenizerProvider};
use codescout_repo::{Git, IgnoreMatchers, read_file_head};
use codescout_vector_data::{
    ChunkPayload, PointFilter, ScrollRequest, VectorPoint, VectorStore, scroll_all,
};
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};
use uuid::Uuid;

/// Bounded concurrency for working-tree reads
const FILE_READ_CONCURRENCY: usize = 10;

/// Full runs flush the embed batch after this many files
const FULL_FLUSH_FILES: usize = 15;

/// Incremental runs touch fewer files, so they batch more per flush
const INCREMENTAL_FLUSH_FILES: usize = 50;

/// Orphan deletes OR this many paths per filter
const ORPHAN_DELETE_BATCH: usize = 500;

/// Point-copy upsert batch size
const COPY_BATCH: usize = 500;

/// Indexing engine settings, one immutable snapshot per process
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub embedding_model: String,
    pub embedding_max_tokens: usize,
    pub embedding_concurrency: usize,
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub max_file_bytes: usize,
    pub point_namespace: Uuid,
    pub ignore_file: String,
}

impl IndexerSettings {
    pub fn from_config(config: &ApplicationConfig) -> Self {
        Self {
            embedding_model: config.embedding.model.clone(),
            embedding_max_tokens: config.embedding.max_tokens,
            embedding_concurrency: config.embedding.concurrency,
            chunk_target_tokens: config.indexing.chunk_target_tokens,
            chunk_overlap_tokens: config.indexing.chunk_overlap_tokens,
            max_file_bytes: config.indexing.max_file_bytes,
            point_namespace: config.indexing.point_namespace,
            ignore_file: config.indexing.ignore_file.clone(),
        }
    }
}

/// Identity of one indexing run
#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Canonical repository URL; the `repo_id` on every point
    pub repo_id: String,
    pub collection: String,
    /// Commit being indexed; written to every point touched this run
    pub commit: String,
    pub vector_size: usize,
}

/// Counters of one run, for logs and tests
#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub files_indexed: usize,
    pub files_reused: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_written: usize,
}

struct ProcessResult {
    stats: IndexOutcome,
    processed_paths: HashSet<String>,
}

/// Prefetched per-file state from the collection
struct ExistingFile {
    file_hash: String,
    commit: Option<String>,
    token_count: i64,
}

struct PreparedFile {
    content: String,
    hash: String,
}

struct FileChunks {
    path: String,
    file_hash: String,
    chunks: Vec<Chunk>,
}

struct FlushOutcome {
    chunks: usize,
}

/// Accumulates chunks across files until a flush is due
struct Batcher {
    max_tokens: usize,
    flush_file_interval: usize,
    files: Vec<FileChunks>,
    tokens: usize,
}

impl Batcher {
    const fn new(max_tokens: usize, flush_file_interval: usize) -> Self {
        Self {
            max_tokens,
            flush_file_interval,
            files: Vec::new(),
            tokens: 0,
        }
    }

    fn push(&mut self, path: String, file_hash: String, chunks: Vec<Chunk>) {
        self.tokens = self.tokens.saturating_add(
            chunks
                .iter()
                .map(|c| c.token_count)
                .sum::<usize>(),
        );
        self.files.push(FileChunks {
            path,
            file_hash,
            chunks,
        });
    }

    fn should_flush(&self) -> bool {
        self.tokens >= self.max_tokens || self.files.len() >= self.flush_file_interval
    }

    fn take(&mut self) -> Vec<FileChunks> {
        self.tokens = 0;
        std::mem::take(&mut self.files)
    }
}

type VectorSizeCell = Arc<OnceCell<usize>>;

/// The indexing engine. Shared across runs; all per-run state lives on
/// the stack of the `run_*` call.
pub struct RepoIndexer {
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    tokenizers: Arc<dyn TokenizerProvider>,
    ignores: IgnoreMatchers,
    settings: IndexerSettings,
    // Per-model vector size, probed once; the cell dedupes concurrent probes
    vector_sizes: DashMap<String, VectorSizeCell>,
}

impl RepoIndexer {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        tokenizers: Arc<dyn TokenizerProvider>,
        settings: IndexerSettings,
    ) -> Self {
        let ignores = IgnoreMatchers::new(settings.ignore_file.clone());
        Self {
            vectors,
            embeddings,
            tokenizers,
            ignores,
            settings,
            vector_sizes: DashMap::new(),
        }
    }

    pub const fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Hash of the chunking configuration in effect
    pub fn chunking_signature_hash(&self) -> String {
        ChunkingSignature::new(
            self.settings.chunk_target_tokens,
            self.settings.chunk_overlap_tokens,
            self.settings.embedding_max_tokens,
            self.settings.max_file_bytes,
            self.settings.ignore_file.clone(),
            self.settings.point_namespace,
        )
        .hash()
    }

    /// Vector dimension of a model, probed with a one-token embed and
    /// cached. Concurrent callers share one in-flight probe.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Empty`] (wrapped) when the provider
    /// yields nothing for the probe.
    pub async fn vector_size_for(&self, model: &str) -> IndexingResult<usize> {
        let cell = self
            .vector_sizes
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let size = cell
            .get_or_try_init(|| async {
                let vectors = self.embeddings.embed(model, &["ping".to_string()]).await?;
                vectors
                    .first()
                    .filter(|v| !v.is_empty())
                    .map(Vec::len)
                    .ok_or(EmbeddingError::Empty)
            })
            .await?;
        Ok(*size)
    }

    /// Approximate token total of the whole tree: blob bytes at HEAD
    /// divided by four. Returns 0 when git fails.
    pub async fn estimate_total_tokens(&self, git: &Git) -> i64 {
        match git.ls_tree_total_bytes().await {
            Ok(bytes) => (bytes / 4) as i64,
            Err(e) => {
                tracing::debug!(error = %e, "Total size estimate failed");
                0
            }
        }
    }

    /// Approximate token count of what changed between two commits,
    /// including uncommitted working-tree changes. Falls back to the full
    /// estimate when the diff cannot run (e.g. shallow history).
    pub async fn estimate_changed_tokens(&self, git: &Git, from: &str, to: &str) -> i64 {
        let changed = match self.changed_paths(git, from, to).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::debug!(error = %e, "Changed-path diff failed, using full estimate");
                return self.estimate_total_tokens(git).await;
            }
        };
        if changed.is_empty() {
            return 0;
        }
        let sizes = git.ls_tree_sizes(&changed).await;
        (sizes.values().sum::<u64>() / 4) as i64
    }

    /// Union of `git diff --name-only from..to` and porcelain
    /// working-tree changes, renames contributing both sides.
    ///
    /// # Errors
    ///
    /// Propagates a failing diff so callers can fall back to a full walk.
    pub async fn changed_paths(&self, git: &Git, from: &str, to: &str) -> IndexingResult<Vec<String>> {
        let mut union: BTreeSet<String> = git.diff_name_only(from, to).await?.into_iter().collect();
        match git.status_changes().await {
            Ok(paths) => union.extend(paths),
            Err(e) => tracing::debug!(error = %e, "Porcelain status unavailable"),
        }
        Ok(union.into_iter().collect())
    }

    /// Bulk-copy every point of one collection into another, preserving
    /// ids, vectors, and payloads. Returns the number of points copied;
    /// a missing source copies nothing.
    ///
    /// # Errors
    ///
    /// Propagates scroll/upsert failures.
    pub async fn copy_collection_points(&self, source: &str, target: &str) -> IndexingResult<u64> {
        let request = ScrollRequest {
            with_vector: true,
            ..Default::default()
        };
        let stream = scroll_all(self.vectors.as_ref(), source, request);
        futures::pin_mut!(stream);

        let mut copied = 0u64;
        let mut batch: Vec<VectorPoint> = Vec::with_capacity(COPY_BATCH);
        while let Some(record) = stream.next().await {
            let record = record?;
            let Some(vector) = record.vector else { continue };
            batch.push(VectorPoint {
                id: record.id,
                vector,
                payload: record.payload,
            });
            if batch.len() >= COPY_BATCH {
                copied = copied.saturating_add(batch.len() as u64);
                self.vectors.upsert(target, std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            copied = copied.saturating_add(batch.len() as u64);
            self.vectors.upsert(target, batch).await?;
        }
        Ok(copied)
    }

    /// Index the whole tree: walk `git ls-files`, reuse unchanged files,
    /// chunk-embed-upsert the rest, then delete points whose path is no
    /// longer present.
    ///
    /// # Errors
    ///
    /// Propagates git, embedding, and vector-store failures. Per-file
    /// read problems (binary, oversize, unreadable) skip the file only.
    #[tracing::instrument(skip_all, fields(collection = %params.collection, commit = %params.commit))]
    pub async fn run_full_index(
        &self,
        git: &Git,
        params: &IndexParams,
        progress: Option<Arc<dyn ProgressSink>>,
        keepalive: Option<Arc<dyn Keepalive>>,
    ) -> IndexingResult<IndexOutcome> {
        let matcher = self.ignores.load(git.exec().as_ref(), git.root()).await?;
        let candidates: Vec<String> = git
            .ls_files()
            .await?
            .into_iter()
            .filter(|p| !matcher.matches(p))
            .collect();

        self.vectors
            .ensure_collection(&params.collection, params.vector_size)
            .await?;
        for field in ["repo_id", "path", "file_hash"] {
            self.vectors
                .ensure_payload_index(&params.collection, field)
                .await?;
        }

        let existing = self.prefetch_existing(params).await?;
        tracing::debug!(
            candidates = candidates.len(),
            known_files = existing.len(),
            "Starting full index"
        );

        let result = self
            .process_files(
                git,
                params,
                candidates,
                &existing,
                FULL_FLUSH_FILES,
                progress,
                keepalive,
            )
            .await?;

        let mut stats = result.stats;
        stats.files_deleted = self
            .cleanup_orphaned_chunks(params, &result.processed_paths)
            .await?;

        tracing::info!(
            indexed = stats.files_indexed,
            reused = stats.files_reused,
            skipped = stats.files_skipped,
            chunks = stats.chunks_written,
            "Full index complete"
        );
        Ok(stats)
    }

    /// Index only what changed since `from_commit`. Deleted paths get
    /// their points removed directly; there is no orphan scan. Falls back
    /// to a full index when the diff cannot run.
    ///
    /// # Errors
    ///
    /// Propagates git, embedding, and vector-store failures.
    #[tracing::instrument(skip_all, fields(collection = %params.collection, from = %from_commit, to = %params.commit))]
    pub async fn run_incremental_index(
        &self,
        git: &Git,
        params: &IndexParams,
        from_commit: &str,
        progress: Option<Arc<dyn ProgressSink>>,
        keepalive: Option<Arc<dyn Keepalive>>,
    ) -> IndexingResult<IndexOutcome> {
        let changed = match self.changed_paths(git, from_commit, &params.commit).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "Diff unavailable, falling back to full index");
                return self.run_full_index(git, params, progress, keepalive).await;
            }
        };

        let matcher = self.ignores.load(git.exec().as_ref(), git.root()).await?;
        let tracked: HashSet<String> = git.ls_files().await?.into_iter().collect();

        self.vectors
            .ensure_collection(&params.collection, params.vector_size)
            .await?;

        let mut stats = IndexOutcome::default();
        let mut surviving = Vec::new();
        for path in changed.into_iter().filter(|p| !matcher.matches(p)) {
            if tracked.contains(&path) {
                surviving.push(path);
            } else {
                let filter = PointFilter::repo(&params.repo_id).must("path", &path);
                self.vectors
                    .delete_by_filter(&params.collection, &filter)
                    .await?;
                stats.files_deleted = stats.files_deleted.saturating_add(1);
            }
        }

        // No prefetch: changed files re-embed unconditionally
        let no_reuse = HashMap::new();
        let result = self
            .process_files(
                git,
                params,
                surviving,
                &no_reuse,
                INCREMENTAL_FLUSH_FILES,
                progress,
                keepalive,
            )
            .await?;

        stats.files_indexed = result.stats.files_indexed;
        stats.files_reused = result.stats.files_reused;
        stats.files_skipped = result.stats.files_skipped;
        stats.chunks_written = result.stats.chunks_written;

        tracing::info!(
            indexed = stats.files_indexed,
            deleted = stats.files_deleted,
            chunks = stats.chunks_written,
            "Incremental index complete"
        );
        Ok(stats)
    }

    /// Existing per-file state of the collection, from one filtered
    /// scroll with a trimmed payload
    async fn prefetch_existing(
        &self,
        params: &IndexParams,
    ) -> IndexingResult<HashMap<String, ExistingFile>> {
        let request = ScrollRequest {
            filter: Some(PointFilter::repo(&params.repo_id)),
            with_vector: false,
            payload_fields: Some(vec![
                "path".to_string(),
                "file_hash".to_string(),
                "commit".to_string(),
                "token_count".to_string(),
            ]),
            ..Default::default()
        };

        let stream = scroll_all(self.vectors.as_ref(), &params.collection, request);
        futures::pin_mut!(stream);

        let mut map: HashMap<String, ExistingFile> = HashMap::new();
        while let Some(record) = stream.next().await {
            let record = record?;
            let payload = record.payload;
            if payload.path.is_empty() {
                continue;
            }
            let Some(file_hash) = payload.file_hash else { continue };
            let tokens = payload.token_count.unwrap_or(0);
            map.entry(payload.path)
                .and_modify(|e| e.token_count = e.token_count.saturating_add(tokens))
                .or_insert(ExistingFile {
                    file_hash,
                    commit: payload.commit,
                    token_count: tokens,
                });
        }
        Ok(map)
    }

    /// The shared per-file pipeline: bounded reads, reuse classification,
    /// chunking, batched embedding with bounded concurrency, upserts.
    #[allow(clippy::too_many_arguments)]
    async fn process_files(
        &self,
        git: &Git,
        params: &IndexParams,
        paths: Vec<String>,
        existing: &HashMap<String, ExistingFile>,
        flush_file_interval: usize,
        progress: Option<Arc<dyn ProgressSink>>,
        keepalive: Option<Arc<dyn Keepalive>>,
    ) -> IndexingResult<ProcessResult> {
        let tokenizer = self.tokenizers.tokenizer(&self.settings.embedding_model)?;
        let chunker = Chunker::new(
            self.settings.chunk_target_tokens,
            self.settings.chunk_overlap_tokens,
            self.settings.embedding_max_tokens,
        );
        let semaphore = Arc::new(Semaphore::new(self.settings.embedding_concurrency.max(1)));
        let mut flush_tasks: tokio::task::JoinSet<IndexingResult<FlushOutcome>> =
            tokio::task::JoinSet::new();

        let exec = Arc::clone(git.exec());
        let root = git.root().to_string();
        let max_file_bytes = self.settings.max_file_bytes;

        let reads = futures::stream::iter(paths.into_iter().map(|path| {
            let exec = Arc::clone(&exec);
            let root = root.clone();
            async move {
                let prepared = prepare_file(exec.as_ref(), &root, &path, max_file_bytes).await;
                (path, prepared)
            }
        }))
        .buffer_unordered(FILE_READ_CONCURRENCY);
        futures::pin_mut!(reads);

        let mut batcher = Batcher::new(self.settings.embedding_max_tokens, flush_file_interval);
        let mut processed: HashSet<String> = HashSet::new();
        let mut stats = IndexOutcome::default();

        while let Some((path, prepared)) = reads.next().await {
            let Some(file) = prepared else {
                stats.files_skipped = stats.files_skipped.saturating_add(1);
                continue;
            };

            match existing.get(&path) {
                // Unchanged content at the current commit: nothing to do
                Some(known)
                    if known.file_hash == file.hash
                        && known.commit.as_deref() == Some(params.commit.as_str()) =>
                {
                    if let Some(p) = &progress {
                        p.add_tokens(known.token_count).await;
                    }
                    processed.insert(path);
                    stats.files_reused = stats.files_reused.saturating_add(1);
                }
                // Unchanged content, stale commit: refresh point metadata
                // without re-embedding
                Some(known) if known.file_hash == file.hash => {
                    self.refresh_stale_points(params, &path, &file.hash).await?;
                    if let Some(p) = &progress {
                        p.add_tokens(known.token_count).await;
                    }
                    if let Some(k) = &keepalive {
                        k.touch().await;
                    }
                    processed.insert(path);
                    stats.files_reused = stats.files_reused.saturating_add(1);
                }
                // Changed or new: clear old points, chunk, queue for embed
                _ => {
                    let filter = PointFilter::repo(&params.repo_id).must("path", &path);
                    self.vectors
                        .delete_by_filter(&params.collection, &filter)
                        .await?;

                    let chunks = chunker.chunk(&file.content, tokenizer.as_ref());
                    processed.insert(path.clone());
                    if chunks.is_empty() {
                        stats.files_skipped = stats.files_skipped.saturating_add(1);
                        continue;
                    }
                    stats.files_indexed = stats.files_indexed.saturating_add(1);
                    batcher.push(path, file.hash, chunks);

                    if batcher.should_flush() {
                        self.spawn_flush(
                            &mut flush_tasks,
                            Arc::clone(&semaphore),
                            params,
                            batcher.take(),
                            progress.clone(),
                            keepalive.clone(),
                        );
                    }
                }
            }
        }

        let remainder = batcher.take();
        if !remainder.is_empty() {
            self.spawn_flush(
                &mut flush_tasks,
                Arc::clone(&semaphore),
                params,
                remainder,
                progress.clone(),
                keepalive.clone(),
            );
        }

        while let Some(joined) = flush_tasks.join_next().await {
            let outcome =
                joined.map_err(|e| IndexingError::Internal(format!("flush task: {e}")))??;
            stats.chunks_written = stats.chunks_written.saturating_add(outcome.chunks);
        }

        Ok(ProcessResult {
            stats,
            processed_paths: processed,
        })
    }

    fn spawn_flush(
        &self,
        tasks: &mut tokio::task::JoinSet<IndexingResult<FlushOutcome>>,
        semaphore: Arc<Semaphore>,
        params: &IndexParams,
        batch: Vec<FileChunks>,
        progress: Option<Arc<dyn ProgressSink>>,
        keepalive: Option<Arc<dyn Keepalive>>,
    ) {
        let vectors = Arc::clone(&self.vectors);
        let embeddings = Arc::clone(&self.embeddings);
        let model = self.settings.embedding_model.clone();
        let namespace = self.settings.point_namespace;
        let params = params.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| IndexingError::Internal(format!("embed semaphore: {e}")))?;
            flush_batch(
                vectors, embeddings, model, namespace, params, batch, progress, keepalive,
            )
            .await
        });
    }

    /// Same content stored under an older commit: rewrite commit and
    /// timestamp on the stored points, preserving their vectors
    async fn refresh_stale_points(
        &self,
        params: &IndexParams,
        path: &str,
        file_hash: &str,
    ) -> IndexingResult<()> {
        let filter = PointFilter::repo(&params.repo_id)
            .must("file_hash", file_hash)
            .must("path", path);
        let request = ScrollRequest {
            filter: Some(filter),
            with_vector: true,
            ..Default::default()
        };

        let stream = scroll_all(self.vectors.as_ref(), &params.collection, request);
        futures::pin_mut!(stream);

        let now = Utc::now().to_rfc3339();
        let mut refreshed: Vec<VectorPoint> = Vec::new();
        while let Some(record) = stream.next().await {
            let record = record?;
            let Some(vector) = record.vector else { continue };
            let mut payload = record.payload;
            payload.commit = Some(params.commit.clone());
            payload.indexed_at = Some(now.clone());
            refreshed.push(VectorPoint {
                id: record.id,
                vector,
                payload,
            });
            if refreshed.len() >= COPY_BATCH {
                self.vectors
                    .upsert(&params.collection, std::mem::take(&mut refreshed))
                    .await?;
            }
        }
        if !refreshed.is_empty() {
            self.vectors.upsert(&params.collection, refreshed).await?;
        }
        Ok(())
    }

    /// After a full walk, delete points whose path was not processed this
    /// run. Paths are OR-ed in bounded batches under the repo filter.
    /// Returns the number of orphaned paths removed.
    async fn cleanup_orphaned_chunks(
        &self,
        params: &IndexParams,
        processed: &HashSet<String>,
    ) -> IndexingResult<usize> {
        let request = ScrollRequest {
            filter: Some(PointFilter::repo(&params.repo_id)),
            with_vector: false,
            payload_fields: Some(vec!["path".to_string()]),
            ..Default::default()
        };
        let stream = scroll_all(self.vectors.as_ref(), &params.collection, request);
        futures::pin_mut!(stream);

        let mut orphans: BTreeSet<String> = BTreeSet::new();
        while let Some(record) = stream.next().await {
            let record = record?;
            let path = record.payload.path;
            if !path.is_empty() && !processed.contains(&path) {
                orphans.insert(path);
            }
        }

        let orphans: Vec<String> = orphans.into_iter().collect();
        for batch in orphans.chunks(ORPHAN_DELETE_BATCH) {
            let mut filter = PointFilter::repo(&params.repo_id);
            for path in batch {
                filter = filter.should("path", path);
            }
            self.vectors
                .delete_by_filter(&params.collection, &filter)
                .await?;
        }
        if !orphans.is_empty() {
            tracing::debug!(count = orphans.len(), "Removed orphaned paths");
        }
        Ok(orphans.len())
    }
}

/// Read and validate one file. `None` skips it: unreadable, over the
/// size limit, empty after trimming, or binary (NUL byte heuristic).
async fn prepare_file(
    exec: &dyn codescout_repo::RepoExec,
    root: &str,
    path: &str,
    max_file_bytes: usize,
) -> Option<PreparedFile> {
    let content = match read_file_head(exec, root, path, max_file_bytes).await {
        Ok(Some(content)) => content,
        Ok(None) => {
            tracing::debug!(path, "Unreadable file skipped");
            return None;
        }
        Err(e) => {
            tracing::debug!(path, error = %e, "File read failed, skipped");
            return None;
        }
    };

    if content.len() > max_file_bytes {
        tracing::debug!(path, bytes = content.len(), "Oversize file skipped");
        return None;
    }
    if content.trim().is_empty() {
        tracing::debug!(path, "Empty file skipped");
        return None;
    }
    if content.contains('\0') {
        tracing::debug!(path, "Binary file skipped");
        return None;
    }

    let hash = sha1_hex(&content);
    Some(PreparedFile { content, hash })
}

/// Embed one accumulated batch and upsert its points.
///
/// A vector-dimension mismatch drops the whole batch (logged) rather
/// than writing inconsistent points.
#[allow(clippy::too_many_arguments)]
async fn flush_batch(
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    model: String,
    namespace: Uuid,
    params: IndexParams,
    batch: Vec<FileChunks>,
    progress: Option<Arc<dyn ProgressSink>>,
    keepalive: Option<Arc<dyn Keepalive>>,
) -> IndexingResult<FlushOutcome> {
    let texts: Vec<String> = batch
        .iter()
        .flat_map(|f| f.chunks.iter().map(|c| c.text.clone()))
        .collect();
    if texts.is_empty() {
        return Ok(FlushOutcome { chunks: 0 });
    }

    let embedded = embeddings.embed(&model, &texts).await?;
    if embedded.len() != texts.len() || embedded.iter().any(|v| v.len() != params.vector_size) {
        tracing::warn!(
            expected = params.vector_size,
            returned = embedded.len(),
            "Embedding shape mismatch, dropping batch"
        );
        return Ok(FlushOutcome { chunks: 0 });
    }

    let now = Utc::now().to_rfc3339();
    let mut points = Vec::with_capacity(texts.len());
    let mut tokens = 0i64;
    let mut vectors_iter = embedded.into_iter();

    for file in &batch {
        for chunk in &file.chunks {
            let Some(vector) = vectors_iter.next() else { break };
            let chunk_hash = sha1_hex(&chunk.text);
            let id = Uuid::new_v5(
                &namespace,
                format!("{}|{}|{}", params.repo_id, file.path, chunk_hash).as_bytes(),
            );
            tokens = tokens.saturating_add(chunk.token_count as i64);
            points.push(VectorPoint {
                id,
                vector,
                payload: ChunkPayload {
                    repo_id: params.repo_id.clone(),
                    path: file.path.clone(),
                    start_line: Some(chunk.start_line as i64),
                    end_line: Some(chunk.end_line as i64),
                    text: Some(chunk.text.clone()),
                    chunk_hash: Some(chunk_hash),
                    file_hash: Some(file.file_hash.clone()),
                    commit: Some(params.commit.clone()),
                    indexed_at: Some(now.clone()),
                    token_count: Some(chunk.token_count as i64),
                },
            });
        }
    }

    let written = points.len();
    vectors.upsert(&params.collection, points).await?;

    if let Some(p) = &progress {
        p.add_tokens(tokens).await;
    }
    if let Some(k) = &keepalive {
        k.touch().await;
    }

    Ok(FlushOutcome { chunks: written })
}
