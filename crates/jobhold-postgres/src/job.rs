//! Postgres implementation of the job queue core.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobhold_core::error::map_constraint_violation;
use jobhold_core::{
    Job, JobQueue, JobStateMask, JobStatus, JobType, NewJob, StoreError, TimeProvider,
};

use crate::fnv::hash32;
use crate::notify::{channel_name, wait_for_notification};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    priority: i16,
    payload: Value,
    metadata: Value,
    session_id: Option<Uuid>,
    site_id: Option<Uuid>,
    source_id: Option<Uuid>,
    is_test: bool,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    max_retries: i32,
    last_error: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            job_type: JobType::from_db(row.job_type),
            status: row.status.parse()?,
            priority: row.priority,
            payload: row.payload,
            metadata: row.metadata,
            session_id: row.session_id,
            site_id: row.site_id,
            source_id: row.source_id,
            is_test: row.is_test,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            last_error: row.last_error,
            lease_expires_at: row.lease_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed [`JobQueue`], plus the transaction-scoped and
/// notification-channel primitives that don't fit a backend-agnostic trait
/// (see the crate-level note in `DESIGN.md`).
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    clock: Arc<dyn TimeProvider>,
    retry_delay: Duration,
}

impl PgJobStore {
    pub fn new(pool: PgPool, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            clock,
            retry_delay: jobhold_core::DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enrolled in a caller-supplied transaction, used by the scheduler
    /// driver to atomically mark a task queued and enqueue its job.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: NewJob,
    ) -> Result<Job, StoreError> {
        let max_retries = req.validate()?;
        let now = self.clock.now();
        let scheduled_at = req.scheduled_at.unwrap_or(now);
        let id = Uuid::new_v4();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, job_type, status, priority, payload, metadata,
                session_id, site_id, source_id, is_test,
                scheduled_at, retry_count, max_retries, created_at, updated_at
            ) VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12, $12)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.job_type.as_str())
        .bind(req.priority)
        .bind(&req.payload)
        .bind(&req.metadata)
        .bind(req.session_id)
        .bind(req.site_id)
        .bind(req.source_id)
        .bind(req.is_test)
        .bind(scheduled_at)
        .bind(max_retries)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_constraint_violation(e, "job", || req.job_type.to_string(), Some("site")))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel_name(&req.job_type))
            .bind(id.to_string())
            .execute(&mut **tx)
            .await?;

        Job::try_from(row)
    }

    /// Per-type advisory transaction lock so concurrent requeues of the same
    /// type serialise; returns 0 without erroring when the lock is held
    /// elsewhere.
    pub async fn requeue_expired(&self, job_type: &JobType) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let lock_key = hash32(job_type.as_str());
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock(1001, $1)")
            .bind(lock_key)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            tx.rollback().await.ok();
            return Ok(0);
        }

        let now = self.clock.now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', lease_expires_at = NULL, updated_at = $1
            WHERE job_type = $2 AND status = 'running'
              AND lease_expires_at IS NOT NULL AND lease_expires_at < $1
            "#,
        )
        .bind(now)
        .bind(job_type.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        if result.rows_affected() > 0 {
            tracing::info!(job_type = %job_type, requeued = result.rows_affected(), "requeued expired leases");
        }
        Ok(result.rows_affected())
    }

    /// Blocks until a job of this type is reserved or created, or cancelled.
    pub async fn wait_for_notification(
        &self,
        job_type: &JobType,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        wait_for_notification(&self.pool, job_type, cancel).await
    }

    /// Best-effort scheduler-fire clear shared by Complete and Fail.
    async fn clear_scheduler_fire(&self, metadata: &Value, now: DateTime<Utc>) -> Result<(), StoreError> {
        let scheduler = metadata.get("scheduler");
        let task_name = scheduler.and_then(|s| s.get("task_name")).and_then(Value::as_str);
        let fire_key = scheduler.and_then(|s| s.get("fire_key")).and_then(Value::as_str);
        let (Some(task_name), Some(fire_key)) = (task_name, fire_key) else {
            return Ok(());
        };

        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET active_fire_key = NULL, active_fire_key_set_at = NULL, updated_at = $1
            WHERE task_name = $2 AND active_fire_key = $3
            "#,
        )
        .bind(now)
        .bind(task_name)
        .bind(fire_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobStore {
    async fn create(&self, req: NewJob) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;
        let job = self.create_in_tx(&mut tx, req).await?;
        tx.commit().await?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, "created job");
        Ok(job)
    }

    async fn reserve_next(&self, job_type: &JobType, lease: Duration) -> Result<Job, StoreError> {
        if lease <= Duration::zero() {
            return Err(StoreError::invalid("lease must be positive"));
        }
        self.requeue_expired(job_type).await?;

        let now = self.clock.now();
        let lease_expires_at = now + lease;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH claimable AS (
                SELECT id FROM jobs
                WHERE job_type = $1 AND status = 'pending' AND scheduled_at <= $2
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                started_at = COALESCE(started_at, $2),
                lease_expires_at = $3,
                updated_at = $2
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(job_type.as_str())
        .bind(now)
        .bind(lease_expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                tracing::info!(job_id = %job.id, job_type = %job_type, "reserved job");
                Ok(job)
            }
            None => Err(StoreError::NoJobsAvailable),
        }
    }

    async fn heartbeat(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError> {
        if lease <= Duration::zero() {
            return Err(StoreError::invalid("lease must be positive"));
        }
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE jobs SET lease_expires_at = $1, updated_at = $2 WHERE id = $3 AND status = 'running'",
        )
        .bind(now + lease)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: Uuid) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (Value,)>(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = $1, updated_at = $1,
                lease_expires_at = NULL, last_error = NULL
            WHERE id = $2 AND status = 'running'
            RETURNING metadata
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((metadata,)) = row else {
            tx.rollback().await.ok();
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO job_meta (job_id, last_status, updated_at)
            VALUES ($1, 'completed', $2)
            ON CONFLICT (job_id) DO UPDATE SET last_status = excluded.last_status, updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(job_id = %id, "completed job");

        if let Err(err) = self.clear_scheduler_fire(&metadata, now).await {
            tracing::warn!(job_id = %id, %err, "best-effort scheduler fire clear failed after Complete");
        }

        Ok(true)
    }

    async fn fail(&self, id: Uuid, err: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (i32, i32, Value)>(
            "SELECT retry_count, max_retries, metadata FROM jobs WHERE id = $1 AND status = 'running' FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((retry_count, max_retries, metadata)) = row else {
            tx.rollback().await.ok();
            return Ok(false);
        };

        let next_retry_count = retry_count + 1;
        let exhausted = next_retry_count >= max_retries;

        if exhausted {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', retry_count = $1, last_error = $2,
                    completed_at = $3, updated_at = $3, lease_expires_at = NULL
                WHERE id = $4
                "#,
            )
            .bind(next_retry_count)
            .bind(err)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            let scheduled_at = now + self.retry_delay;
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', retry_count = $1, last_error = $2,
                    scheduled_at = $3, updated_at = $4, lease_expires_at = NULL
                WHERE id = $5
                "#,
            )
            .bind(next_retry_count)
            .bind(err)
            .bind(scheduled_at)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO job_meta (job_id, last_status, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO UPDATE SET last_status = excluded.last_status, updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(if exhausted { "failed" } else { "pending" })
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::warn!(job_id = %id, retry_count = next_retry_count, exhausted, "job failed");

        if let Err(err) = self.clear_scheduler_fire(&metadata, now).await {
            tracing::warn!(job_id = %id, %err, "best-effort scheduler fire clear failed after Fail");
        }

        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let now = self.clock.now();
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id = $1 AND status IN ('pending', 'completed', 'failed')
              AND (lease_expires_at IS NULL OR lease_expires_at < $2)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let row = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(
            "SELECT status, lease_expires_at FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Err(StoreError::not_found("job", id)),
            Some((status, lease_expires_at)) => {
                let status: JobStatus = status.parse()?;
                let lease_active = lease_expires_at.is_some_and(|l| l >= now);
                if status == JobStatus::Running || lease_active {
                    Err(StoreError::JobReserved { id })
                } else {
                    Err(StoreError::JobNotDeletable { id })
                }
            }
        }
    }

    async fn delete_by_payload_field(
        &self,
        job_type: &JobType,
        field: &str,
        value: &Value,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE job_type = $1 AND status = 'pending'
              AND (lease_expires_at IS NULL OR lease_expires_at < $2)
              AND payload->$3 = $4
            "#,
        )
        .bind(job_type.as_str())
        .bind(now)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn job_states_by_task_name(&self, task_name: &str) -> Result<JobStateMask, StoreError> {
        let now = self.clock.now();
        let rows = sqlx::query_as::<_, (String, Option<DateTime<Utc>>, i32)>(
            "SELECT status, lease_expires_at, retry_count FROM jobs WHERE metadata->'scheduler'->>'task_name' = $1",
        )
        .bind(task_name)
        .fetch_all(&self.pool)
        .await?;

        let mut mask = JobStateMask::NONE;
        for (status, lease_expires_at, retry_count) in rows {
            let status: JobStatus = status.parse()?;
            match status {
                JobStatus::Running if lease_expires_at.is_some_and(|l| l >= now) => {
                    mask = mask | JobStateMask::RUNNING;
                }
                JobStatus::Pending if retry_count > 0 => {
                    mask = mask | JobStateMask::RETRYING;
                }
                JobStatus::Pending => {
                    mask = mask | JobStateMask::PENDING;
                }
                _ => {}
            }
        }
        Ok(mask)
    }
}
