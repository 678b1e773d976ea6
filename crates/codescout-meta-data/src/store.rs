//! Relational store for repositories and their per-branch indexes

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{MetaDataError, MetaDataErrorExt, MetaDataResult};
use crate::lock::{IndexLock, index_lock_key};
use crate::models::{IndexStatus, NewRepoIndex, RepoIndex, RepoIndexPatch, Repository};

/// Store trait for index rows and the repository lookups around them
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// The index row for a `(repository, branch)` pair, if any
    async fn get_index(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Option<RepoIndex>>;

    /// Index row by primary key
    async fn get_index_by_id(&self, id: Uuid) -> MetaDataResult<Option<RepoIndex>>;

    /// All index rows of one repository, most recently updated first
    async fn list_indexes_for_repository(
        &self,
        repository_id: Uuid,
    ) -> MetaDataResult<Vec<RepoIndex>>;

    /// All index rows currently in any of the given statuses
    async fn list_indexes_in_statuses(
        &self,
        statuses: &[IndexStatus],
    ) -> MetaDataResult<Vec<RepoIndex>>;

    /// Insert a fresh index row
    async fn create_index(&self, row: NewRepoIndex) -> MetaDataResult<RepoIndex>;

    /// Apply a partial update and return the new row
    async fn update_index(&self, id: Uuid, patch: RepoIndexPatch) -> MetaDataResult<RepoIndex>;

    /// Delete an index row
    async fn delete_index(&self, id: Uuid) -> MetaDataResult<()>;

    /// Atomic, DB-side counter bump; never read-modify-write
    async fn increment_indexed_tokens(&self, id: Uuid, amount: i64) -> MetaDataResult<()>;

    /// Acquire the advisory lock serializing state transitions for a
    /// `(repository, branch)` pair
    async fn acquire_index_lock(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Box<dyn IndexLock>>;

    /// Repository row by id
    async fn get_repository(&self, id: Uuid) -> MetaDataResult<Option<Repository>>;

    /// Repository row by its identity key
    async fn find_repository(
        &self,
        owner: &str,
        repo: &str,
        created_by: &str,
        provider: &str,
    ) -> MetaDataResult<Option<Repository>>;

    /// Delete a repository row and its index rows. Vector collections and
    /// queued jobs are cleaned up by the caller, which owns those clients.
    async fn delete_repository(&self, id: Uuid) -> MetaDataResult<Vec<RepoIndex>>;
}

/// `PostgreSQL` implementation of [`IndexStore`]
#[derive(Clone)]
pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INDEX_COLUMNS: &str = "id, repository_id, repo_url, branch, status, collection, \
     last_indexed_commit, embedding_model, vector_size, chunking_signature_hash, \
     estimated_tokens, indexed_tokens, error_message, created_at, updated_at";

fn index_from_row(row: &PgRow) -> RepoIndex {
    RepoIndex {
        id: row.get("id"),
        repository_id: row.get("repository_id"),
        repo_url: row.get("repo_url"),
        branch: row.get("branch"),
        status: row.get::<String, _>("status").into(),
        collection: row.get("collection"),
        last_indexed_commit: row.get("last_indexed_commit"),
        embedding_model: row.get("embedding_model"),
        vector_size: row.get("vector_size"),
        chunking_signature_hash: row.get("chunking_signature_hash"),
        estimated_tokens: row.get("estimated_tokens"),
        indexed_tokens: row.get("indexed_tokens"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn repository_from_row(row: &PgRow) -> Repository {
    Repository {
        id: row.get("id"),
        owner: row.get("owner"),
        repo: row.get("repo"),
        url: row.get("url"),
        provider: row.get("provider"),
        default_branch: row.get("default_branch"),
        created_by: row.get("created_by"),
        encrypted_token: row.get("encrypted_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn get_index(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Option<RepoIndex>> {
        let row = sqlx::query(&format!(
            "SELECT {INDEX_COLUMNS} FROM repo_indexes WHERE repository_id = $1 AND branch = $2"
        ))
        .bind(repository_id)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("get_index")?;

        Ok(row.as_ref().map(index_from_row))
    }

    async fn get_index_by_id(&self, id: Uuid) -> MetaDataResult<Option<RepoIndex>> {
        let row = sqlx::query(&format!(
            "SELECT {INDEX_COLUMNS} FROM repo_indexes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("get_index_by_id")?;

        Ok(row.as_ref().map(index_from_row))
    }

    async fn list_indexes_for_repository(
        &self,
        repository_id: Uuid,
    ) -> MetaDataResult<Vec<RepoIndex>> {
        let rows = sqlx::query(&format!(
            "SELECT {INDEX_COLUMNS} FROM repo_indexes WHERE repository_id = $1 \
             ORDER BY updated_at DESC"
        ))
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await
        .map_db_err("list_indexes_for_repository")?;

        Ok(rows.iter().map(index_from_row).collect())
    }

    async fn list_indexes_in_statuses(
        &self,
        statuses: &[IndexStatus],
    ) -> MetaDataResult<Vec<RepoIndex>> {
        let status_strings: Vec<String> = statuses.iter().map(ToString::to_string).collect();
        let rows = sqlx::query(&format!(
            "SELECT {INDEX_COLUMNS} FROM repo_indexes WHERE status = ANY($1) \
             ORDER BY updated_at ASC"
        ))
        .bind(&status_strings)
        .fetch_all(&self.pool)
        .await
        .map_db_err("list_indexes_in_statuses")?;

        Ok(rows.iter().map(index_from_row).collect())
    }

    async fn create_index(&self, new: NewRepoIndex) -> MetaDataResult<RepoIndex> {
        let row = sqlx::query(&format!(
            "INSERT INTO repo_indexes \
             (repository_id, repo_url, branch, status, collection, last_indexed_commit, \
              embedding_model, vector_size, chunking_signature_hash, estimated_tokens, \
              indexed_tokens) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {INDEX_COLUMNS}"
        ))
        .bind(new.repository_id)
        .bind(&new.repo_url)
        .bind(&new.branch)
        .bind(new.status.to_string())
        .bind(&new.collection)
        .bind(&new.last_indexed_commit)
        .bind(&new.embedding_model)
        .bind(new.vector_size)
        .bind(&new.chunking_signature_hash)
        .bind(new.estimated_tokens)
        .bind(new.indexed_tokens)
        .fetch_one(&self.pool)
        .await
        .map_db_err("create_index")?;

        Ok(index_from_row(&row))
    }

    async fn update_index(&self, id: Uuid, patch: RepoIndexPatch) -> MetaDataResult<RepoIndex> {
        let row = sqlx::query(&format!(
            "UPDATE repo_indexes SET \
                status = COALESCE($2, status), \
                repo_url = COALESCE($3, repo_url), \
                collection = COALESCE($4, collection), \
                last_indexed_commit = CASE WHEN $13 THEN NULL \
                    ELSE COALESCE($5, last_indexed_commit) END, \
                embedding_model = COALESCE($6, embedding_model), \
                vector_size = COALESCE($7, vector_size), \
                chunking_signature_hash = COALESCE($8, chunking_signature_hash), \
                estimated_tokens = COALESCE($9, estimated_tokens), \
                indexed_tokens = COALESCE($10, indexed_tokens), \
                error_message = CASE WHEN $11 THEN NULL ELSE COALESCE($12, error_message) END, \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {INDEX_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.status.map(|s| s.to_string()))
        .bind(&patch.repo_url)
        .bind(&patch.collection)
        .bind(&patch.last_indexed_commit)
        .bind(&patch.embedding_model)
        .bind(patch.vector_size)
        .bind(&patch.chunking_signature_hash)
        .bind(patch.estimated_tokens)
        .bind(patch.indexed_tokens)
        .bind(patch.clear_error)
        .bind(&patch.error_message)
        .bind(patch.clear_last_indexed_commit)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("update_index")?
        .ok_or_else(|| MetaDataError::NotFound(format!("repo_index {id}")))?;

        Ok(index_from_row(&row))
    }

    async fn delete_index(&self, id: Uuid) -> MetaDataResult<()> {
        sqlx::query("DELETE FROM repo_indexes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_db_err("delete_index")?;
        Ok(())
    }

    async fn increment_indexed_tokens(&self, id: Uuid, amount: i64) -> MetaDataResult<()> {
        sqlx::query(
            "UPDATE repo_indexes \
             SET indexed_tokens = indexed_tokens + $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_db_err("increment_indexed_tokens")?;
        Ok(())
    }

    async fn acquire_index_lock(
        &self,
        repository_id: Uuid,
        branch: &str,
    ) -> MetaDataResult<Box<dyn IndexLock>> {
        let key = index_lock_key(&repository_id, branch);

        // The lock must live and die with one session. A detached
        // connection closes when the guard drops, so a cancelled holder
        // cannot leak the lock back into the pool.
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MetaDataError::Connection(format!("lock connection: {e}")))?;
        let mut conn = conn.detach();

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut conn)
            .await
            .map_db_err("pg_advisory_lock")?;

        Ok(Box::new(PgIndexLockGuard { conn, key }))
    }

    async fn get_repository(&self, id: Uuid) -> MetaDataResult<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM git_repositories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_db_err("get_repository")?;
        Ok(row.as_ref().map(repository_from_row))
    }

    async fn find_repository(
        &self,
        owner: &str,
        repo: &str,
        created_by: &str,
        provider: &str,
    ) -> MetaDataResult<Option<Repository>> {
        let row = sqlx::query(
            "SELECT * FROM git_repositories \
             WHERE owner = $1 AND repo = $2 AND created_by = $3 AND provider = $4",
        )
        .bind(owner)
        .bind(repo)
        .bind(created_by)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("find_repository")?;
        Ok(row.as_ref().map(repository_from_row))
    }

    async fn delete_repository(&self, id: Uuid) -> MetaDataResult<Vec<RepoIndex>> {
        let rows = sqlx::query(&format!(
            "DELETE FROM repo_indexes WHERE repository_id = $1 RETURNING {INDEX_COLUMNS}"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_db_err("delete_repository_indexes")?;

        sqlx::query("DELETE FROM git_repositories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_db_err("delete_repository")?;

        Ok(rows.iter().map(index_from_row).collect())
    }
}

struct PgIndexLockGuard {
    conn: PgConnection,
    key: i64,
}

#[async_trait]
impl IndexLock for PgIndexLockGuard {
    async fn release(self: Box<Self>) {
        let mut guard = *self;
        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(guard.key)
            .execute(&mut guard.conn)
            .await
        {
            tracing::warn!(key = guard.key, error = %e, "Advisory unlock failed; closing session releases it");
        }
        // Dedicated session; closing it is what guarantees release.
        let _ = guard.conn.close().await;
    }
}
