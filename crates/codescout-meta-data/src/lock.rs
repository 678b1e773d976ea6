//! Per-`(repository, branch)` advisory locks
//!
//! Index state transitions are serialized with `PostgreSQL` session
//! advisory locks rather than row locks: an indexing claim can take
//! minutes, and a row lock would pin a transaction for the duration.
//! The lock key is derived from a SHA-256 of the pair so it fits the
//! 64-bit advisory lock space.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 64-bit advisory lock key for a `(repository, branch)` pair:
/// the first 8 bytes of `sha256("{repository_id}:{branch}")`, signed.
pub fn index_lock_key(repository_id: &Uuid, branch: &str) -> i64 {
    let digest = Sha256::digest(format!("{repository_id}:{branch}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(digest.get(..8).unwrap_or(&[0u8; 8]));
    i64::from_be_bytes(bytes)
}

/// A held advisory lock.
///
/// Implementations release on [`IndexLock::release`]; the Postgres
/// implementation also releases if the holding task is cancelled, because
/// the dedicated session closes with the guard.
#[async_trait]
pub trait IndexLock: Send {
    /// Release the lock. Errors are logged, not returned; release sits in
    /// finally-position at every call site.
    async fn release(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable() {
        let repo = Uuid::from_u128(42);
        assert_eq!(index_lock_key(&repo, "main"), index_lock_key(&repo, "main"));
    }

    #[test]
    fn test_lock_key_distinguishes_branches_and_repos() {
        let repo_a = Uuid::from_u128(1);
        let repo_b = Uuid::from_u128(2);
        assert_ne!(
            index_lock_key(&repo_a, "main"),
            index_lock_key(&repo_a, "feature")
        );
        assert_ne!(
            index_lock_key(&repo_a, "main"),
            index_lock_key(&repo_b, "main")
        );
    }
}
