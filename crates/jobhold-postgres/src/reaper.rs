//! Postgres-backed reaper and its driver loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;

use jobhold_core::{JobStatus, Reaper, ReaperConfig, StoreError, TimeProvider};
use jobhold_core::reaper::validate_batch_params;

/// Advisory lock minors under major 1000.
mod lock_minor {
    pub const STALE_PENDING: i32 = 1;
    pub const DELETE_OLD_JOBS: i32 = 2;
    pub const DELETE_OLD_JOB_RESULTS: i32 = 3;
}

#[derive(Clone)]
pub struct PgReaper {
    pool: PgPool,
    clock: Arc<dyn TimeProvider>,
}

impl PgReaper {
    pub fn new(pool: PgPool, clock: Arc<dyn TimeProvider>) -> Self {
        Self { pool, clock }
    }

    /// Runs `body` inside a transaction behind `pg_try_advisory_xact_lock(1000, minor)`;
    /// returns 0 without erroring if another reaper pass holds the lock.
    async fn under_lock<F, Fut>(&self, minor: i32, body: F) -> Result<u64, StoreError>
    where
        F: FnOnce(sqlx::Transaction<'static, sqlx::Postgres>) -> Fut,
        Fut: std::future::Future<Output = Result<(sqlx::Transaction<'static, sqlx::Postgres>, u64), StoreError>>,
    {
        let mut tx = self.pool.begin().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock(1000, $1)")
            .bind(minor)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            tx.rollback().await.ok();
            return Ok(0);
        }

        let (tx, affected) = body(tx).await?;
        tx.commit().await?;
        Ok(affected)
    }
}

#[async_trait]
impl Reaper for PgReaper {
    async fn fail_stale_pending_jobs(&self, max_age: Duration, batch_size: i64) -> Result<u64, StoreError> {
        validate_batch_params(max_age, batch_size)?;
        let now = self.clock.now();
        let cutoff = now - max_age;

        self.under_lock(lock_minor::STALE_PENDING, move |mut tx| async move {
            let result = sqlx::query(
                r#"
                WITH stale AS (
                    SELECT id FROM jobs
                    WHERE status = 'pending' AND created_at < $1
                    ORDER BY created_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE jobs
                SET status = 'failed',
                    last_error = 'Job timed out in pending status',
                    completed_at = $3,
                    updated_at = $3
                WHERE id IN (SELECT id FROM stale)
                "#,
            )
            .bind(cutoff)
            .bind(batch_size)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            Ok((tx, result.rows_affected()))
        })
        .await
    }

    async fn delete_old_jobs(
        &self,
        status: JobStatus,
        max_age: Duration,
        batch_size: i64,
    ) -> Result<u64, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::invalid("status must be a terminal status"));
        }
        validate_batch_params(max_age, batch_size)?;
        let cutoff = self.clock.now() - max_age;
        let status_str = status.as_str();

        self.under_lock(lock_minor::DELETE_OLD_JOBS, move |mut tx| async move {
            let result = sqlx::query(
                r#"
                WITH doomed AS (
                    SELECT id FROM jobs
                    WHERE status = $1 AND COALESCE(completed_at, updated_at) < $2
                    ORDER BY COALESCE(completed_at, updated_at)
                    LIMIT $3
                    FOR UPDATE SKIP LOCKED
                )
                DELETE FROM jobs WHERE id IN (SELECT id FROM doomed)
                "#,
            )
            .bind(status_str)
            .bind(cutoff)
            .bind(batch_size)
            .execute(&mut *tx)
            .await?;
            Ok((tx, result.rows_affected()))
        })
        .await
    }

    async fn delete_old_job_results(
        &self,
        job_type: Option<&str>,
        max_age: Duration,
        batch_size: i64,
    ) -> Result<u64, StoreError> {
        validate_batch_params(max_age, batch_size)?;
        let cutoff = self.clock.now() - max_age;
        let job_type = job_type.map(str::to_string);

        self.under_lock(lock_minor::DELETE_OLD_JOB_RESULTS, move |mut tx| async move {
            let result = if let Some(job_type) = job_type {
                sqlx::query(
                    r#"
                    WITH doomed AS (
                        SELECT ctid FROM job_results
                        WHERE job_type = $1 AND updated_at < $2
                        ORDER BY updated_at
                        LIMIT $3
                        FOR UPDATE SKIP LOCKED
                    )
                    DELETE FROM job_results WHERE ctid IN (SELECT ctid FROM doomed)
                    "#,
                )
                .bind(job_type)
                .bind(cutoff)
                .bind(batch_size)
                .execute(&mut *tx)
                .await?
            } else {
                sqlx::query(
                    r#"
                    WITH doomed AS (
                        SELECT ctid FROM job_results
                        WHERE updated_at < $1
                        ORDER BY updated_at
                        LIMIT $2
                        FOR UPDATE SKIP LOCKED
                    )
                    DELETE FROM job_results WHERE ctid IN (SELECT ctid FROM doomed)
                    "#,
                )
                .bind(cutoff)
                .bind(batch_size)
                .execute(&mut *tx)
                .await?
            };
            Ok((tx, result.rows_affected()))
        })
        .await
    }
}

/// Runs the three sweeps on independent tick intervals. A failed
/// pass is logged at `warn` and retried on its own next tick; one sweep's
/// failure never blocks the others.
pub struct ReaperDriver {
    reaper: PgReaper,
    config: ReaperConfig,
}

impl ReaperDriver {
    pub fn new(reaper: PgReaper, config: ReaperConfig) -> Self {
        Self { reaper, config }
    }

    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut stale_pending_tick =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_secs.max(1)));
        let mut retention_tick = tokio::time::interval(std::time::Duration::from_secs(
            (self.config.tick_interval_secs * 10).max(1),
        ));

        loop {
            tokio::select! {
                _ = stale_pending_tick.tick() => self.sweep_stale_pending().await,
                _ = retention_tick.tick() => self.sweep_retention().await,
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn sweep_stale_pending(&self) {
        match self
            .reaper
            .fail_stale_pending_jobs(
                self.config.stale_pending_max_age(),
                self.config.stale_pending_batch_size,
            )
            .await
        {
            Ok(n) => tracing::info!(swept = n, "reaper pass complete: stale pending"),
            Err(err) => tracing::warn!(%err, "reaper pass failed: stale pending"),
        }
    }

    async fn sweep_retention(&self) {
        match self
            .reaper
            .delete_old_jobs(
                JobStatus::Completed,
                self.config.completed_retention(),
                self.config.terminal_delete_batch_size,
            )
            .await
        {
            Ok(n) => tracing::info!(swept = n, "reaper pass complete: old completed jobs"),
            Err(err) => tracing::warn!(%err, "reaper pass failed: old completed jobs"),
        }

        match self
            .reaper
            .delete_old_jobs(
                JobStatus::Failed,
                self.config.failed_retention(),
                self.config.terminal_delete_batch_size,
            )
            .await
        {
            Ok(n) => tracing::info!(swept = n, "reaper pass complete: old failed jobs"),
            Err(err) => tracing::warn!(%err, "reaper pass failed: old failed jobs"),
        }

        match self
            .reaper
            .delete_old_job_results(
                None,
                self.config.job_results_retention(),
                self.config.job_results_delete_batch_size,
            )
            .await
        {
            Ok(n) => tracing::info!(swept = n, "reaper pass complete: old job results"),
            Err(err) => tracing::warn!(%err, "reaper pass failed: old job results"),
        }
    }
}
