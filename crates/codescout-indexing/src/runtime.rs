//! Isolated runtimes for background indexing jobs
//!
//! A background job clones into an environment it owns exclusively and
//! destroys when done. The trait pair keeps the worker independent of
//! whether that environment is a container or a local scratch directory.

use crate::error::{IndexingError, IndexingResult};
use async_trait::async_trait;
use codescout_repo::{LocalExec, RepoExec};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

/// An ephemeral environment owned by exactly one job
#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    /// Shell executor running inside the runtime
    fn exec(&self) -> Arc<dyn RepoExec>;

    /// Absolute workspace path inside the runtime
    fn workspace(&self) -> &str;

    /// Mark the runtime as in-use so idle reaping leaves it alone
    async fn touch(&self);

    /// Tear the runtime down. Called in finally-position; failures are
    /// logged by the caller, never propagated past the job result.
    async fn destroy(&self) -> IndexingResult<()>;
}

/// Provisions isolated runtimes on demand
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Provision a runtime labelled for observability
    async fn provision(&self, label: &str) -> IndexingResult<Arc<dyn IsolatedRuntime>>;
}

/// Scratch-directory runtime on the local host
pub struct LocalRuntime {
    dir: PathBuf,
    workspace: String,
    exec: Arc<LocalExec>,
    last_used: Mutex<Instant>,
}

#[async_trait]
impl IsolatedRuntime for LocalRuntime {
    fn exec(&self) -> Arc<dyn RepoExec> {
        Arc::clone(&self.exec) as Arc<dyn RepoExec>
    }

    fn workspace(&self) -> &str {
        &self.workspace
    }

    async fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    async fn destroy(&self) -> IndexingResult<()> {
        tokio::fs::remove_dir_all(&self.dir)
            .await
            .map_err(|e| IndexingError::Runtime(format!("cleanup {}: {e}", self.workspace)))
    }
}

/// Provider creating per-job scratch directories under the system temp dir
#[derive(Default)]
pub struct LocalRuntimeProvider;

impl LocalRuntimeProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuntimeProvider for LocalRuntimeProvider {
    async fn provision(&self, label: &str) -> IndexingResult<Arc<dyn IsolatedRuntime>> {
        let dir = std::env::temp_dir().join(format!("{label}-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IndexingError::Runtime(format!("provision {}: {e}", dir.display())))?;

        let workspace = dir.to_string_lossy().into_owned();
        tracing::debug!(label, workspace = %workspace, "Provisioned local runtime");
        Ok(Arc::new(LocalRuntime {
            exec: Arc::new(LocalExec::new(&dir)),
            dir,
            workspace,
            last_used: Mutex::new(Instant::now()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_runtime_lifecycle() {
        let provider = LocalRuntimeProvider::new();
        let runtime = provider.provision("codescout-test").await.unwrap();

        let workspace = runtime.workspace().to_string();
        assert!(std::path::Path::new(&workspace).is_dir());

        let result = runtime.exec().exec("echo alive").await.unwrap();
        assert_eq!(result.stdout_trimmed(), "alive");

        runtime.touch().await;
        runtime.destroy().await.unwrap();
        assert!(!std::path::Path::new(&workspace).exists());
    }
}
