//! Shared helpers for indexing integration tests
//!
//! Builds real throwaway git repositories and wires the engine to the
//! in-memory store, queue, vector store, and embedder mocks.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use codescout_embeddings::{MockEmbeddingProvider, MockTokenizerProvider};
use codescout_indexing::lifecycle::GetOrInitRequest;
use codescout_indexing::{IndexLifecycleManager, IndexerSettings, RepoIndexer};
use codescout_meta_data::{MockIndexStore, MockJobQueue};
use codescout_repo::{LocalExec, RepoExec};
use codescout_search::SearchService;
use codescout_vector_data::MockVectorStore;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use uuid::{Uuid, uuid};

pub const TEST_NAMESPACE: Uuid = uuid!("1b671a64-40d5-491e-99b0-da01ff1f3341");
pub const VECTOR_SIZE: usize = 8;

/// Run a git command in a directory, asserting success
pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.email=tests@example.com",
            "-c",
            "user.name=Tests",
        ])
        .args(args)
        .output()
        .expect("git should be runnable");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Initialize a repository on branch `main`
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "--quiet"]);
    git(dir, &["checkout", "-q", "-b", "main"]);
}

/// Write a file and commit it
pub fn commit_file(dir: &Path, path: &str, content: &str, message: &str) {
    let full = dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// Remove a file and commit the deletion
pub fn commit_removal(dir: &Path, path: &str, message: &str) {
    git(dir, &["rm", "-q", path]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// Current HEAD commit of a repository
pub fn head_commit(dir: &Path) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// The full stack over in-memory backends
pub struct Harness {
    pub store: Arc<MockIndexStore>,
    pub queue: Arc<MockJobQueue>,
    pub vectors: Arc<MockVectorStore>,
    pub embedder: Arc<MockEmbeddingProvider>,
    pub indexer: Arc<RepoIndexer>,
    pub lifecycle: Arc<IndexLifecycleManager>,
    pub repository_id: Uuid,
}

pub fn settings() -> IndexerSettings {
    IndexerSettings {
        embedding_model: "test-model".to_string(),
        embedding_max_tokens: 400,
        embedding_concurrency: 2,
        chunk_target_tokens: 64,
        chunk_overlap_tokens: 8,
        max_file_bytes: 100_000,
        point_namespace: TEST_NAMESPACE,
        ignore_file: ".codebaseindexignore".to_string(),
    }
}

/// Log output for failing tests, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn harness(inline_threshold_tokens: i64) -> Harness {
    harness_with_settings(inline_threshold_tokens, settings())
}

pub fn harness_with_settings(inline_threshold_tokens: i64, settings: IndexerSettings) -> Harness {
    init_tracing();
    let store = Arc::new(MockIndexStore::new());
    let queue = Arc::new(MockJobQueue::new());
    let vectors = Arc::new(MockVectorStore::new());
    let embedder = Arc::new(MockEmbeddingProvider::new(VECTOR_SIZE));
    let model = settings.embedding_model.clone();

    let indexer = Arc::new(RepoIndexer::new(
        Arc::clone(&vectors) as _,
        Arc::clone(&embedder) as _,
        Arc::new(MockTokenizerProvider::new()),
        settings,
    ));
    let search = Arc::new(SearchService::new(
        Arc::clone(&embedder) as _,
        Arc::clone(&vectors) as _,
        model,
    ));
    let lifecycle = Arc::new(IndexLifecycleManager::new(
        Arc::clone(&store) as _,
        Arc::clone(&queue) as _,
        Arc::clone(&vectors) as _,
        Arc::clone(&indexer),
        search,
        inline_threshold_tokens,
    ));

    Harness {
        store,
        queue,
        vectors,
        embedder,
        indexer,
        lifecycle,
        repository_id: Uuid::new_v4(),
    }
}

impl Harness {
    pub fn request(&self, repo_root: &Path, branch: &str) -> GetOrInitRequest {
        GetOrInitRequest {
            repository_id: self.repository_id,
            repo_url: repo_root.to_string_lossy().into_owned(),
            repo_root: repo_root.to_string_lossy().into_owned(),
            branch: branch.to_string(),
            exec: Arc::new(LocalExec::unrooted()) as Arc<dyn RepoExec>,
            user_id: None,
        }
    }
}
