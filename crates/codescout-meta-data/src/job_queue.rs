//! `PostgreSQL`-backed background job queue
//!
//! Durable FIFO with at-least-once delivery for indexing jobs. Claims use
//! the SKIP LOCKED pattern so concurrent workers never double-process;
//! stalled detection rescues jobs whose worker died mid-run. The job id
//! is the `repo_index_id`, which makes enqueueing idempotent per index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codescout_config::QueueConfig;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{MetaDataErrorExt, MetaDataResult};
use crate::models::{JobData, JobState};

/// Poll interval of the claim loop when the queue is empty
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Queue surface exposed to the lifecycle layer
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job, idempotently per `repo_index_id`:
    /// - an existing waiting/delayed job is left alone
    /// - an orphaned active job (expired lock) is removed and re-added
    /// - a completed/failed job is removed and re-added
    async fn add_job(&self, data: &JobData) -> MetaDataResult<()>;

    /// Best-effort removal; an actively running job is left alone
    async fn remove_job(&self, id: Uuid) -> MetaDataResult<()>;

    /// Current state of a job, if it exists
    async fn job_state(&self, id: Uuid) -> MetaDataResult<Option<JobState>>;
}

/// Lifecycle callbacks of one job consumer
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivery. An `Err` triggers retry or final failure.
    async fn on_process(&self, data: JobData) -> anyhow::Result<()>;

    /// The job's lock expired while active; it has been put back to waiting
    async fn on_stalled(&self, id: Uuid);

    /// A delivery failed but attempts remain; the job is delayed for retry
    async fn on_retry(&self, id: Uuid, error: &str);

    /// The final attempt failed (or stalling exceeded its limit)
    async fn on_failed(&self, id: Uuid, error: &str);
}

/// What happened to a failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Requeued with backoff
    Retry { delay: Duration },
    /// Out of attempts; marked failed
    Failed,
}

struct ClaimedJob {
    data: JobData,
}

struct RescuedJob {
    id: Uuid,
    failed: bool,
}

/// `PostgreSQL` implementation of the job queue
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PgJobQueue {
    pub const fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Claim the next ready job (SKIP LOCKED; FIFO by creation time)
    async fn claim_next(&self) -> MetaDataResult<Option<ClaimedJob>> {
        let row = sqlx::query(
            r"
            WITH claimed AS (
                SELECT id FROM index_jobs
                WHERE status = 'waiting' AND available_at <= NOW()
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE index_jobs
            SET status = 'active',
                attempts_made = attempts_made + 1,
                locked_until = NOW() + make_interval(secs => $1),
                updated_at = NOW()
            FROM claimed
            WHERE index_jobs.id = claimed.id
            RETURNING index_jobs.id, index_jobs.repo_url, index_jobs.branch
            ",
        )
        .bind(self.config.lock_duration_secs as f64)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("claim_next_job")?;

        Ok(row.map(|r| ClaimedJob {
            data: JobData {
                repo_index_id: r.get("id"),
                repo_url: r.get("repo_url"),
                branch: r.get("branch"),
            },
        }))
    }

    async fn complete(&self, id: Uuid) -> MetaDataResult<()> {
        sqlx::query(
            r"
            UPDATE index_jobs
            SET status = 'completed', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_db_err("complete_job")?;

        self.prune("completed", self.config.remove_on_complete).await
    }

    /// Requeue with backoff while attempts remain, otherwise fail for good
    async fn retry_or_fail(&self, id: Uuid, message: &str) -> MetaDataResult<JobOutcome> {
        let row = sqlx::query("SELECT attempts_made FROM index_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_db_err("read_job_attempts")?;

        let Some(row) = row else {
            return Ok(JobOutcome::Failed);
        };
        let attempts_made: i32 = row.get("attempts_made");

        if attempts_made < self.config.attempts as i32 {
            // Exponential backoff: base * 2^(attempt - 1)
            let exponent = attempts_made.saturating_sub(1).max(0) as u32;
            let delay_ms = self
                .config
                .backoff_base_ms
                .saturating_mul(2u64.saturating_pow(exponent));
            let delay = Duration::from_millis(delay_ms);

            sqlx::query(
                r"
                UPDATE index_jobs
                SET status = 'waiting',
                    locked_until = NULL,
                    available_at = NOW() + make_interval(secs => $2),
                    last_error = $3,
                    updated_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(delay.as_secs_f64())
            .bind(message)
            .execute(&self.pool)
            .await
            .map_db_err("requeue_job")?;

            Ok(JobOutcome::Retry { delay })
        } else {
            sqlx::query(
                r"
                UPDATE index_jobs
                SET status = 'failed',
                    locked_until = NULL,
                    last_error = $2,
                    finished_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_db_err("fail_job")?;

            self.prune("failed", self.config.remove_on_fail).await?;
            Ok(JobOutcome::Failed)
        }
    }

    /// Put expired active jobs back to waiting; jobs over the stall limit
    /// are failed outright. A stall does not consume a delivery attempt.
    async fn rescue_stalled(&self) -> MetaDataResult<Vec<RescuedJob>> {
        let rows = sqlx::query(
            r"
            UPDATE index_jobs
            SET stalled_count = stalled_count + 1,
                status = CASE WHEN stalled_count + 1 > $1 THEN 'failed' ELSE 'waiting' END,
                attempts_made = GREATEST(attempts_made - 1, 0),
                locked_until = NULL,
                available_at = NOW(),
                last_error = CASE
                    WHEN stalled_count + 1 > $1 THEN 'job stalled more than allowable limit'
                    ELSE last_error
                END,
                finished_at = CASE WHEN stalled_count + 1 > $1 THEN NOW() ELSE finished_at END,
                updated_at = NOW()
            WHERE status = 'active' AND locked_until < NOW()
            RETURNING id, status
            ",
        )
        .bind(self.config.max_stalled_count as i32)
        .fetch_all(&self.pool)
        .await
        .map_db_err("rescue_stalled_jobs")?;

        Ok(rows
            .into_iter()
            .map(|r| RescuedJob {
                id: r.get("id"),
                failed: r.get::<String, _>("status") == "failed",
            })
            .collect())
    }

    /// Keep only the newest `keep` finished jobs in a terminal status
    async fn prune(&self, status: &str, keep: u32) -> MetaDataResult<()> {
        sqlx::query(
            r"
            DELETE FROM index_jobs
            WHERE status = $1 AND id NOT IN (
                SELECT id FROM index_jobs
                WHERE status = $1
                ORDER BY finished_at DESC NULLS LAST
                LIMIT $2
            )
            ",
        )
        .bind(status)
        .bind(i64::from(keep))
        .execute(&self.pool)
        .await
        .map_db_err("prune_jobs")?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn add_job(&self, data: &JobData) -> MetaDataResult<()> {
        let existing = sqlx::query("SELECT status, locked_until FROM index_jobs WHERE id = $1")
            .bind(data.repo_index_id)
            .fetch_optional(&self.pool)
            .await
            .map_db_err("read_existing_job")?;

        if let Some(row) = existing {
            let status: String = row.get("status");
            let locked_until: Option<DateTime<Utc>> = row.get("locked_until");
            match status.as_str() {
                "waiting" => return Ok(()),
                "active" => {
                    let orphaned = locked_until.is_none_or(|until| until < Utc::now());
                    if !orphaned {
                        // A live worker owns it; the stalled scan will
                        // handle it if that worker is actually gone.
                        return Ok(());
                    }
                    warn!(job_id = %data.repo_index_id, "Removing orphaned active job before re-add");
                }
                _ => {} // completed / failed: replace below
            }
            sqlx::query("DELETE FROM index_jobs WHERE id = $1")
                .bind(data.repo_index_id)
                .execute(&self.pool)
                .await
                .map_db_err("remove_terminal_job")?;
        }

        sqlx::query(
            r"
            INSERT INTO index_jobs (id, repo_url, branch, status, available_at)
            VALUES ($1, $2, $3, 'waiting', NOW())
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(data.repo_index_id)
        .bind(&data.repo_url)
        .bind(&data.branch)
        .execute(&self.pool)
        .await
        .map_db_err("insert_job")?;

        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> MetaDataResult<()> {
        sqlx::query("DELETE FROM index_jobs WHERE id = $1 AND status <> 'active'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_db_err("remove_job")?;
        Ok(())
    }

    async fn job_state(&self, id: Uuid) -> MetaDataResult<Option<JobState>> {
        let row = sqlx::query("SELECT status, available_at FROM index_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_db_err("job_state")?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            let available_at: DateTime<Utc> = r.get("available_at");
            match status.as_str() {
                "waiting" if available_at > Utc::now() => JobState::Delayed,
                "waiting" => JobState::Waiting,
                "active" => JobState::Active,
                "completed" => JobState::Completed,
                _ => JobState::Failed,
            }
        }))
    }
}

/// Worker pool draining the queue with bounded concurrency
pub struct QueueWorker {
    queue: Arc<PgJobQueue>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    shutdown_signal: Arc<AtomicBool>,
}

impl QueueWorker {
    pub fn new(queue: Arc<PgJobQueue>, handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for graceful shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_signal)
    }

    /// Run claim loops and the stalled scan until shutdown is signaled
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            "Background job worker started"
        );

        let mut join_set = tokio::task::JoinSet::new();

        for worker_id in 0..self.config.concurrency {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let shutdown = Arc::clone(&self.shutdown_signal);

            join_set.spawn(async move {
                claim_loop(worker_id, queue, handler, shutdown).await;
            });
        }

        {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let shutdown = Arc::clone(&self.shutdown_signal);
            let interval = Duration::from_secs(self.config.stalled_check_secs);

            join_set.spawn(async move {
                stalled_loop(queue, handler, shutdown, interval).await;
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("Background job worker stopped");
    }

    /// Claim and process a single job, for tests that drive the queue
    /// step by step. Returns the processed job id, if any.
    ///
    /// # Errors
    ///
    /// Propagates queue storage errors.
    pub async fn process_one(&self) -> MetaDataResult<Option<Uuid>> {
        match self.queue.claim_next().await? {
            Some(job) => {
                let id = job.data.repo_index_id;
                process_claimed(&self.queue, &*self.handler, job).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}

async fn claim_loop(
    worker_id: usize,
    queue: Arc<PgJobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match queue.claim_next().await {
            Ok(Some(job)) => {
                let job_id = job.data.repo_index_id;
                if let Err(e) = process_claimed(&queue, &*handler, job).await {
                    error!(worker_id, job_id = %job_id, error = %e, "Queue bookkeeping failed");
                }
            }
            Ok(None) => sleep(POLL_INTERVAL).await,
            Err(e) => {
                error!(worker_id, error = %e, "Job claim failed");
                sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn process_claimed(
    queue: &PgJobQueue,
    handler: &dyn JobHandler,
    job: ClaimedJob,
) -> MetaDataResult<()> {
    let id = job.data.repo_index_id;
    match handler.on_process(job.data).await {
        Ok(()) => queue.complete(id).await,
        Err(e) => {
            let message = format!("{e:#}");
            match queue.retry_or_fail(id, &message).await? {
                JobOutcome::Retry { delay } => {
                    warn!(job_id = %id, ?delay, "Job failed, retrying");
                    handler.on_retry(id, &message).await;
                    Ok(())
                }
                JobOutcome::Failed => {
                    error!(job_id = %id, error = %message, "Job failed permanently");
                    handler.on_failed(id, &message).await;
                    Ok(())
                }
            }
        }
    }
}

async fn stalled_loop(
    queue: Arc<PgJobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match queue.rescue_stalled().await {
            Ok(rescued) => {
                for job in rescued {
                    if job.failed {
                        handler
                            .on_failed(job.id, "job stalled more than allowable limit")
                            .await;
                    } else {
                        warn!(job_id = %job.id, "Stalled job rescued");
                        handler.on_stalled(job.id).await;
                    }
                }
            }
            Err(e) => error!(error = %e, "Stalled-job scan failed"),
        }
        sleep(interval).await;
    }
}
