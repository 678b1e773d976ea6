//! Per-repository ignore rules
//!
//! Repositories opt files out of indexing with a gitignore-syntax file at
//! their root. Compiled matchers are cached by content hash so repeated
//! runs against an unchanged file cost one `cat`.

use crate::error::RepoResult;
use crate::exec::RepoExec;
use crate::shell::shell_quote;
use codescout_common::sha1_hex;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

const CACHE_CAPACITY: usize = 50;

/// A compiled ignore matcher for one repository state
#[derive(Clone)]
pub struct IgnoreMatcher {
    inner: Arc<Gitignore>,
}

impl IgnoreMatcher {
    /// Whether a repo-relative path is excluded from indexing.
    ///
    /// Negated patterns (`!keep.rs`) and parent-directory matches follow
    /// gitignore semantics.
    pub fn matches(&self, path: &str) -> bool {
        self.inner
            .matched_path_or_any_parents(Path::new(path), false)
            .is_ignore()
    }

    /// Matcher that excludes nothing
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Gitignore::empty()),
        }
    }
}

type MatcherCache = Mutex<LruCache<(String, String), Arc<Gitignore>>>;

/// Shared cache of compiled ignore matchers
///
/// Keyed by `(repo_root, sha1(file content))`; least-recently-used entries
/// are evicted on insertion once 50 matchers are live.
pub struct IgnoreMatchers {
    ignore_file: String,
    cache: MatcherCache,
}

impl IgnoreMatchers {
    pub fn new(ignore_file: impl Into<String>) -> Self {
        Self {
            ignore_file: ignore_file.into(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Load the matcher for a repository root, reusing a cached compile
    /// when the ignore file's content is unchanged.
    ///
    /// A missing or unreadable ignore file yields the empty matcher.
    ///
    /// # Errors
    ///
    /// Propagates executor spawn failures.
    pub async fn load(&self, exec: &dyn RepoExec, repo_root: &str) -> RepoResult<IgnoreMatcher> {
        let path = format!("{repo_root}/{}", self.ignore_file);
        let result = exec.exec(&format!("cat {}", shell_quote(&path))).await?;
        let content = if result.success() {
            result.stdout
        } else {
            String::new()
        };

        let key = (repo_root.to_string(), sha1_hex(&content));
        if let Ok(mut cache) = self.cache.lock()
            && let Some(matcher) = cache.get(&key)
        {
            return Ok(IgnoreMatcher {
                inner: Arc::clone(matcher),
            });
        }

        let compiled = Arc::new(compile(&content));
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, Arc::clone(&compiled));
        }
        Ok(IgnoreMatcher { inner: compiled })
    }
}

fn compile(content: &str) -> Gitignore {
    let mut builder = GitignoreBuilder::new("");
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // Invalid globs are skipped rather than poisoning the whole file
        let _ = builder.add_line(None, trimmed);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::LocalExec;

    #[test]
    fn test_basic_patterns() {
        let matcher = IgnoreMatcher {
            inner: Arc::new(compile("*.log\nbuild/\n")),
        };
        assert!(matcher.matches("debug.log"));
        assert!(matcher.matches("build/out.txt"));
        assert!(!matcher.matches("src/main.rs"));
    }

    #[test]
    fn test_negation() {
        let matcher = IgnoreMatcher {
            inner: Arc::new(compile("*.log\n!keep.log\n")),
        };
        assert!(matcher.matches("debug.log"));
        assert!(!matcher.matches("keep.log"));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let matcher = IgnoreMatcher {
            inner: Arc::new(compile("# comment\n\n*.tmp\n")),
        };
        assert!(matcher.matches("scratch.tmp"));
        assert!(!matcher.matches("# comment"));
    }

    #[test]
    fn test_empty_matcher_excludes_nothing() {
        let matcher = IgnoreMatcher::empty();
        assert!(!matcher.matches("anything/at/all.rs"));
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_empty_matcher() {
        let dir = tempfile::tempdir().unwrap();
        let matchers = IgnoreMatchers::new(".codebaseindexignore");
        let exec = LocalExec::unrooted();
        let matcher = matchers
            .load(&exec, &dir.path().to_string_lossy())
            .await
            .unwrap();
        assert!(!matcher.matches("src/lib.rs"));
    }

    #[tokio::test]
    async fn test_load_caches_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        std::fs::write(dir.path().join(".codebaseindexignore"), "target/\n").unwrap();

        let matchers = IgnoreMatchers::new(".codebaseindexignore");
        let exec = LocalExec::unrooted();

        let first = matchers.load(&exec, &root).await.unwrap();
        let second = matchers.load(&exec, &root).await.unwrap();
        assert!(Arc::ptr_eq(&first.inner, &second.inner), "same content should hit cache");

        std::fs::write(dir.path().join(".codebaseindexignore"), "dist/\n").unwrap();
        let third = matchers.load(&exec, &root).await.unwrap();
        assert!(!Arc::ptr_eq(&first.inner, &third.inner), "changed content should recompile");
        assert!(third.matches("dist/app.js"));
        assert!(!third.matches("target/debug"));
    }
}
