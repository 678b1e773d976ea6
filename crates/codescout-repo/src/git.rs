//! Git plumbing over the exec surface
//!
//! Commands are composed as shell strings with every argument quoted, and
//! scoped to the repository root with `git -C`.

use crate::error::{RepoError, RepoResult};
use crate::exec::RepoExec;
use crate::shell::shell_quote;
use std::collections::HashMap;
use std::sync::Arc;

/// Shallow clone depth used for background checkouts
pub const CLONE_DEPTH: u32 = 100;

/// Batch size for `ls-tree` path lookups
const LS_TREE_BATCH: usize = 200;

/// Git command surface for one repository root
#[derive(Clone)]
pub struct Git {
    exec: Arc<dyn RepoExec>,
    root: String,
}

impl Git {
    pub fn new(exec: Arc<dyn RepoExec>, root: impl Into<String>) -> Self {
        Self {
            exec,
            root: root.into(),
        }
    }

    /// Repository root this instance is scoped to
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The underlying executor
    pub fn exec(&self) -> &Arc<dyn RepoExec> {
        &self.exec
    }

    async fn run(&self, subcommand: &str) -> RepoResult<crate::exec::ExecResult> {
        let cmd = format!("git -C {} {subcommand}", shell_quote(&self.root));
        self.exec.exec(&cmd).await
    }

    async fn run_ok(&self, subcommand: &str) -> RepoResult<String> {
        let result = self.run(subcommand).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(RepoError::Git {
                command: format!("git {subcommand}"),
                stderr: result.stderr.trim().to_string(),
            })
        }
    }

    /// All tracked paths (`git ls-files`)
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] if the command fails.
    pub async fn ls_files(&self) -> RepoResult<Vec<String>> {
        let stdout = self.run_ok("ls-files").await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Resolve the current commit (`git rev-parse HEAD`)
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] if the command fails or resolves to an
    /// empty string (e.g. an unborn branch).
    pub async fn rev_parse_head(&self) -> RepoResult<String> {
        let stdout = self.run_ok("rev-parse HEAD").await?;
        let commit = stdout.trim().to_string();
        if commit.is_empty() {
            return Err(RepoError::Git {
                command: "git rev-parse HEAD".to_string(),
                stderr: "empty commit".to_string(),
            });
        }
        Ok(commit)
    }

    /// Name of the checked-out branch
    ///
    /// Falls back from `rev-parse --abbrev-ref` to `symbolic-ref --short`
    /// so a freshly-initialized repository still reports its branch.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] if neither command yields a name.
    pub async fn current_branch(&self) -> RepoResult<String> {
        if let Ok(stdout) = self.run_ok("rev-parse --abbrev-ref HEAD").await {
            let branch = stdout.trim().to_string();
            if !branch.is_empty() && branch != "HEAD" {
                return Ok(branch);
            }
        }
        let stdout = self.run_ok("symbolic-ref --short HEAD").await?;
        let branch = stdout.trim().to_string();
        if branch.is_empty() {
            return Err(RepoError::Git {
                command: "git symbolic-ref --short HEAD".to_string(),
                stderr: "empty branch".to_string(),
            });
        }
        Ok(branch)
    }

    /// Remote default branch, if the remote HEAD is known locally
    pub async fn default_branch(&self) -> Option<String> {
        let stdout = self
            .run_ok("symbolic-ref refs/remotes/origin/HEAD")
            .await
            .ok()?;
        stdout
            .trim()
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    /// Paths changed between two commits (`git diff --name-only a..b`)
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] on non-zero exit, which callers treat as
    /// "history unavailable" (shallow clone) and fall back to a full walk.
    pub async fn diff_name_only(&self, from: &str, to: &str) -> RepoResult<Vec<String>> {
        let range = format!("{from}..{to}");
        let stdout = self
            .run_ok(&format!("diff --name-only {}", shell_quote(&range)))
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Working-tree changes from `git status --porcelain`.
    ///
    /// Renames contribute both sides: the old path must be deleted from the
    /// index, the new path indexed.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] if the command fails.
    pub async fn status_changes(&self) -> RepoResult<Vec<String>> {
        let stdout = self.run_ok("status --porcelain").await?;
        let mut paths = Vec::new();
        for line in stdout.lines() {
            let Some(rest) = line.get(3..) else { continue };
            let rest = rest.trim();
            if rest.is_empty() {
                continue;
            }
            if let Some((old, new)) = rest.split_once(" -> ") {
                paths.push(unquote(old).to_string());
                paths.push(unquote(new).to_string());
            } else {
                paths.push(unquote(rest).to_string());
            }
        }
        Ok(paths)
    }

    /// Total blob bytes at HEAD (`git ls-tree -r --long HEAD`)
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Git`] if the command fails.
    pub async fn ls_tree_total_bytes(&self) -> RepoResult<u64> {
        let stdout = self.run_ok("ls-tree -r --long HEAD").await?;
        Ok(stdout.lines().filter_map(parse_ls_tree_line).map(|(_, size)| size).sum())
    }

    /// Blob sizes at HEAD for specific paths, looked up in batches.
    ///
    /// Paths git does not know (deleted files) are simply absent from the
    /// returned map. A failing batch contributes nothing rather than
    /// failing the whole estimate.
    pub async fn ls_tree_sizes(&self, paths: &[String]) -> HashMap<String, u64> {
        let mut sizes = HashMap::new();
        for batch in paths.chunks(LS_TREE_BATCH) {
            let quoted: Vec<String> = batch.iter().map(|p| shell_quote(p)).collect();
            let subcommand = format!("ls-tree -l HEAD -- {}", quoted.join(" "));
            match self.run_ok(&subcommand).await {
                Ok(stdout) => {
                    for (path, size) in stdout.lines().filter_map(parse_ls_tree_line) {
                        sizes.insert(path, size);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ls-tree size batch failed, skipping");
                }
            }
        }
        sizes
    }
}

/// Parse one `ls-tree -l` line: `<mode> <type> <oid> <size>\t<path>`
fn parse_ls_tree_line(line: &str) -> Option<(String, u64)> {
    let (meta, path) = line.split_once('\t')?;
    let mut fields = meta.split_whitespace();
    let _mode = fields.next()?;
    let kind = fields.next()?;
    if kind != "blob" {
        return None;
    }
    let _oid = fields.next()?;
    let size: u64 = fields.next()?.parse().ok()?;
    Some((unquote(path).to_string(), size))
}

/// Strip the quoting git applies to paths with special characters.
/// Escape sequences inside are left as-is; such paths are rare and the
/// worst case is a cache miss on reuse.
fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Shallow-clone a repository (`git clone --depth 100 [--branch B] URL DIR`)
///
/// # Errors
///
/// Returns [`RepoError::Git`] if the clone fails.
pub async fn clone_repository(
    exec: &dyn RepoExec,
    url: &str,
    branch: Option<&str>,
    dest: &str,
) -> RepoResult<()> {
    let branch_arg = branch.map_or_else(String::new, |b| format!("--branch {} ", shell_quote(b)));
    let cmd = format!(
        "git clone --depth {CLONE_DEPTH} {branch_arg}-- {} {}",
        shell_quote(url),
        shell_quote(dest)
    );
    let result = exec.exec(&cmd).await?;
    if result.success() {
        Ok(())
    } else {
        Err(RepoError::Git {
            command: "git clone".to_string(),
            stderr: result.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_tree_line() {
        let line = "100644 blob 8ab686eafeb1f44702738c8b0f24f2567c36da6d     123\tsrc/main.rs";
        let (path, size) = parse_ls_tree_line(line).unwrap();
        assert_eq!(path, "src/main.rs");
        assert_eq!(size, 123);
    }

    #[test]
    fn test_parse_ls_tree_skips_non_blobs() {
        let line = "160000 commit 8ab686eafeb1f44702738c8b0f24f2567c36da6d       -\tvendored";
        assert!(parse_ls_tree_line(line).is_none());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("plain/path.rs"), "plain/path.rs");
        assert_eq!(unquote("\"with space.rs\""), "with space.rs");
    }
}
