//! Domain models for database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered git repository
///
/// Rows are owned by the external API layer; this crate only reads them
/// (canonical resolution, token decryption) and cascades deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub owner: String,
    pub repo: String,
    pub url: String,
    pub provider: String,
    pub default_branch: Option<String>,
    pub created_by: String,
    /// AEAD-encrypted access token, opaque outside [`crate::TokenCipher`]
    #[serde(skip_serializing)]
    pub encrypted_token: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a per-branch index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::str::FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid index status: {s}")),
        }
    }
}

impl From<String> for IndexStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::Pending)
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

/// The vector index record for one `(repository, branch)` pair
///
/// Exactly one row exists per pair. When `status` is `Completed`, the
/// commit, model, vector size, chunking signature, and collection all
/// describe what is actually stored in the vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoIndex {
    pub id: Uuid,
    pub repository_id: Uuid,
    /// Normalized repository URL, doubles as the `repo_id` point filter
    pub repo_url: String,
    pub branch: String,
    pub status: IndexStatus,
    pub collection: String,
    pub last_indexed_commit: Option<String>,
    pub embedding_model: Option<String>,
    pub vector_size: Option<i32>,
    pub chunking_signature_hash: Option<String>,
    pub estimated_tokens: i64,
    pub indexed_tokens: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a fresh index row
#[derive(Debug, Clone)]
pub struct NewRepoIndex {
    pub repository_id: Uuid,
    pub repo_url: String,
    pub branch: String,
    pub status: IndexStatus,
    pub collection: String,
    pub last_indexed_commit: Option<String>,
    pub embedding_model: Option<String>,
    pub vector_size: Option<i32>,
    pub chunking_signature_hash: Option<String>,
    pub estimated_tokens: i64,
    pub indexed_tokens: i64,
}

/// Partial update for an index row.
///
/// `None` fields are left untouched. `clear_error` nulls the error
/// message regardless of `error_message`.
#[derive(Debug, Clone, Default)]
pub struct RepoIndexPatch {
    pub status: Option<IndexStatus>,
    pub repo_url: Option<String>,
    pub collection: Option<String>,
    pub last_indexed_commit: Option<String>,
    pub embedding_model: Option<String>,
    pub vector_size: Option<i32>,
    pub chunking_signature_hash: Option<String>,
    pub estimated_tokens: Option<i64>,
    pub indexed_tokens: Option<i64>,
    pub error_message: Option<String>,
    pub clear_error: bool,
    /// Null out `last_indexed_commit`, forcing full-reindex semantics
    pub clear_last_indexed_commit: bool,
}

/// Payload of one background indexing job.
///
/// The job id in the queue IS `repo_index_id`, which is what makes
/// enqueueing idempotent per index row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub repo_index_id: Uuid,
    pub repo_url: String,
    pub branch: String,
}

/// Externally visible job state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Ready to be claimed
    Waiting,
    /// Waiting with a retry backoff still running
    Delayed,
    /// Claimed by a worker
    Active,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_status_round_trip() {
        for status in [
            IndexStatus::Pending,
            IndexStatus::InProgress,
            IndexStatus::Completed,
            IndexStatus::Failed,
        ] {
            let text = status.to_string();
            let parsed: IndexStatus = text.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_string_defaults_to_pending() {
        let status: IndexStatus = String::from("garbage").into();
        assert_eq!(status, IndexStatus::Pending);
    }
}
