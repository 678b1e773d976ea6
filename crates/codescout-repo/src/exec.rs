//! Shell executor abstraction
//!
//! [`RepoExec`] is the single seam between the indexing engine and the place
//! a repository checkout lives: a local directory today, a container
//! workspace for background jobs. Implementations run one shell command and
//! return its captured output; there is no streaming and no stdin.

use crate::error::{RepoError, RepoResult};
use crate::shell::shell_quote;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

/// Exit code reported when a command is aborted at its deadline,
/// matching coreutils `timeout(1)`.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);
const KILL_GRACE: Duration = Duration::from_secs(30);

/// Captured result of a shell command
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Whether the command exited zero
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with surrounding whitespace removed
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Abstract shell executor bound to a working environment
#[async_trait]
pub trait RepoExec: Send + Sync {
    /// Run one shell command and capture its output.
    ///
    /// Non-zero exit codes are returned in the [`ExecResult`], not as
    /// errors; only a failure to execute at all is an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Spawn`] if the command cannot be started.
    async fn exec(&self, cmd: &str) -> RepoResult<ExecResult>;
}

/// Local subprocess executor
///
/// Runs commands through `sh -c` with a per-call deadline. A command that
/// overruns its deadline is killed and reported with exit code 124.
pub struct LocalExec {
    workdir: Option<PathBuf>,
    deadline: Duration,
}

impl LocalExec {
    /// Executor rooted at the given working directory
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(workdir.into()),
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Executor with no working directory (commands use absolute paths)
    pub const fn unrooted() -> Self {
        Self {
            workdir: None,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Override the per-call deadline
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

#[async_trait]
impl RepoExec for LocalExec {
    #[tracing::instrument(skip(self, cmd), fields(cmd_len = cmd.len()))]
    async fn exec(&self, cmd: &str) -> RepoResult<ExecResult> {
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RepoError::Spawn(format!("sh -c: {e}")))?;

        // Drain pipes concurrently so a chatty child cannot deadlock on a
        // full pipe buffer while we wait for it.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match timeout(self.deadline, child.wait()).await {
            Ok(waited) => waited.map_err(|e| RepoError::Io(e.to_string()))?,
            Err(_) => {
                // Deadline hit: kill, then give the process a short grace
                // window to die and release its pipes.
                tracing::warn!(deadline_secs = self.deadline.as_secs(), "Command deadline exceeded, killing");
                let _ = child.start_kill();
                let _ = timeout(KILL_GRACE, child.wait()).await;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                return Ok(ExecResult {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read at most `max_bytes + 1` bytes of a file through the executor.
///
/// Returns `None` if the file cannot be read. The extra byte lets callers
/// distinguish "exactly at the limit" from "over the limit".
///
/// # Errors
///
/// Propagates executor spawn failures.
pub async fn read_file_head(
    exec: &dyn RepoExec,
    root: &str,
    path: &str,
    max_bytes: usize,
) -> RepoResult<Option<String>> {
    let full = format!("{root}/{path}");
    let cmd = format!(
        "head -c {} -- {}",
        max_bytes.saturating_add(1),
        shell_quote(&full)
    );
    let result = exec.exec(&cmd).await?;
    if result.success() {
        Ok(Some(result.stdout))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout_and_exit_code() {
        let exec = LocalExec::unrooted();
        let result = exec.exec("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_not_an_error() {
        let exec = LocalExec::unrooted();
        let result = exec.exec("exit 3").await.unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_exec_captures_stderr() {
        let exec = LocalExec::unrooted();
        let result = exec.exec("echo oops >&2; exit 1").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_exec_deadline_reports_timeout_exit_code() {
        let exec = LocalExec::unrooted().with_deadline(Duration::from_millis(100));
        let result = exec.exec("sleep 5").await.unwrap();
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_workdir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let exec = LocalExec::new(dir.path());
        let result = exec.exec("cat marker.txt").await.unwrap();
        assert_eq!(result.stdout, "here");
    }

    #[tokio::test]
    async fn test_read_file_head_over_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let exec = LocalExec::unrooted();
        let root = dir.path().to_string_lossy().into_owned();

        // Reads limit + 1 bytes, so an over-limit file is detectable
        let content = read_file_head(&exec, &root, "big.txt", 10).await.unwrap();
        assert_eq!(content.unwrap().len(), 11);

        let missing = read_file_head(&exec, &root, "absent.txt", 10).await.unwrap();
        assert!(missing.is_none());
    }
}
