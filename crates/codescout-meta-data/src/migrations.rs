//! Schema migrations
//!
//! Idempotent DDL executed at startup. Statements run one at a time so a
//! partial failure reports the statement that broke.

use crate::error::{MetaDataErrorExt, MetaDataResult};
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS git_repositories (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        owner TEXT NOT NULL,
        repo TEXT NOT NULL,
        url TEXT NOT NULL,
        provider TEXT NOT NULL,
        default_branch TEXT,
        created_by TEXT NOT NULL,
        encrypted_token BYTEA,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS git_repositories_identity
        ON git_repositories(owner, repo, created_by, provider)
    ",
    r"
    CREATE TABLE IF NOT EXISTS repo_indexes (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        repository_id UUID NOT NULL,
        repo_url TEXT NOT NULL,
        branch TEXT NOT NULL,
        status TEXT NOT NULL,
        collection TEXT NOT NULL,
        last_indexed_commit TEXT,
        embedding_model TEXT,
        vector_size INTEGER,
        chunking_signature_hash TEXT,
        estimated_tokens BIGINT NOT NULL DEFAULT 0,
        indexed_tokens BIGINT NOT NULL DEFAULT 0,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS repo_indexes_repo_branch
        ON repo_indexes(repository_id, branch)
    ",
    r"
    CREATE TABLE IF NOT EXISTS index_jobs (
        id UUID PRIMARY KEY,
        repo_url TEXT NOT NULL,
        branch TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'waiting',
        attempts_made INTEGER NOT NULL DEFAULT 0,
        stalled_count INTEGER NOT NULL DEFAULT 0,
        available_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        locked_until TIMESTAMPTZ,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        finished_at TIMESTAMPTZ
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS index_jobs_claim
        ON index_jobs(status, available_at)
    ",
];

/// Apply all migrations.
///
/// # Errors
///
/// Returns the first statement failure.
pub async fn run_migrations(pool: &PgPool) -> MetaDataResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_db_err("run_migrations")?;
    }
    tracing::info!("Database migrations applied");
    Ok(())
}
