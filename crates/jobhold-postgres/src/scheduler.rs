//! Postgres-backed scheduled-task store and driver loop.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use jobhold_core::{
    JobQueue, JobStateMask, JobType, NewJob, NewScheduledJob, OverrunPolicy, ScheduledJob,
    SchedulerConfig, StoreError, TimeProvider,
};

use crate::fnv::hash32;
use crate::job::PgJobStore;

#[derive(sqlx::FromRow)]
struct ScheduledJobRow {
    id: Uuid,
    task_name: String,
    payload: Value,
    scheduled_interval_secs: i64,
    last_queued_at: Option<DateTime<Utc>>,
    overrun_policy: Option<Value>,
    active_fire_key: Option<String>,
    active_fire_key_set_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledJobRow> for ScheduledJob {
    type Error = StoreError;

    fn try_from(row: ScheduledJobRow) -> Result<Self, Self::Error> {
        Ok(ScheduledJob {
            id: row.id,
            task_name: row.task_name,
            payload: row.payload,
            scheduled_interval: Duration::seconds(row.scheduled_interval_secs),
            last_queued_at: row.last_queued_at,
            overrun_policy: row
                .overrun_policy
                .map(|v| decode_overrun_policy(&v))
                .transpose()?,
            active_fire_key: row.active_fire_key,
            active_fire_key_set_at: row.active_fire_key_set_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Wire shape for [`OverrunPolicy`], stored as `jsonb` in `scheduled_jobs`.
fn encode_overrun_policy(policy: &OverrunPolicy) -> Value {
    match policy {
        OverrunPolicy::Allow => serde_json::json!({"kind": "allow"}),
        OverrunPolicy::SkipIfStateMatches(mask) => {
            serde_json::json!({"kind": "skip_if_state_matches", "mask": mask.bits()})
        }
        OverrunPolicy::ReplaceIfStateMatches(mask) => {
            serde_json::json!({"kind": "replace_if_state_matches", "mask": mask.bits()})
        }
        OverrunPolicy::FenceByFireKey => serde_json::json!({"kind": "fence_by_fire_key"}),
    }
}

fn decode_overrun_policy(value: &Value) -> Result<OverrunPolicy, StoreError> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::invalid("overrun_policy missing kind"))?;
    match kind {
        "allow" => Ok(OverrunPolicy::Allow),
        "skip_if_state_matches" => Ok(OverrunPolicy::SkipIfStateMatches(mask_from(value)?)),
        "replace_if_state_matches" => Ok(OverrunPolicy::ReplaceIfStateMatches(mask_from(value)?)),
        "fence_by_fire_key" => Ok(OverrunPolicy::FenceByFireKey),
        other => Err(StoreError::invalid(format!("unknown overrun policy kind: {other}"))),
    }
}

fn mask_from(value: &Value) -> Result<JobStateMask, StoreError> {
    let bits = value
        .get("mask")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::invalid("overrun_policy missing mask"))?;
    Ok(JobStateMask::from_bits(bits as u8))
}

/// Scheduled-task primitives. Transaction-scoped by design: a
/// scheduler tick holds a due row locked while it evaluates the overrun
/// policy and enqueues, so these live as inherent methods rather than a
/// trait (see `DESIGN.md`).
#[derive(Clone)]
pub struct PgScheduledTaskStore {
    pool: PgPool,
}

impl PgScheduledTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: NewScheduledJob) -> Result<ScheduledJob, StoreError> {
        req.validate()?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = sqlx::query_as::<_, ScheduledJobRow>(
            r#"
            INSERT INTO scheduled_jobs (id, task_name, payload, scheduled_interval_secs, overrun_policy, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.task_name)
        .bind(&req.payload)
        .bind(req.scheduled_interval.num_seconds())
        .bind(req.overrun_policy.as_ref().map(encode_overrun_policy))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            jobhold_core::error::map_constraint_violation(e, "scheduled_job", || req.task_name.clone(), None)
        })?;
        ScheduledJob::try_from(row)
    }

    /// Must be called inside a transaction the caller already holds open;
    /// rows stay locked until that transaction ends.
    pub async fn find_due(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        if limit <= 0 {
            return Err(StoreError::invalid("limit must be positive"));
        }
        let rows = sqlx::query_as::<_, ScheduledJobRow>(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE last_queued_at IS NULL OR last_queued_at + (scheduled_interval_secs || ' seconds')::interval <= $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        rows.into_iter().map(ScheduledJob::try_from).collect()
    }

    /// Records that a due task was just fired.
    pub async fn mark_queued(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET last_queued_at = $1, updated_at = $1 WHERE id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set `active_fire_key` atomically, honouring the "only if unset or
    /// stale" clause of FenceByFireKey.
    pub async fn try_set_fire_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        fire_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET active_fire_key = $1, active_fire_key_set_at = $2, updated_at = $2
            WHERE id = $3 AND active_fire_key IS NULL
            "#,
        )
        .bind(fire_key)
        .bind(now)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Acquires a single-arg advisory transaction lock keyed by the task
    /// name's FNV-1a hash; `body` runs only if the lock is acquired. Returns
    /// `(locked, result)`.
    pub async fn try_with_task_lock<F, Fut, T>(
        &self,
        task_name: &str,
        body: F,
    ) -> Result<(bool, Option<T>), StoreError>
    where
        F: FnOnce(Transaction<'static, Postgres>) -> Fut,
        Fut: std::future::Future<Output = Result<(Transaction<'static, Postgres>, T), StoreError>>,
    {
        let mut tx = self.pool.begin().await?;
        let lock_key = hash32(task_name);
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(lock_key)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            tx.rollback().await.ok();
            return Ok((false, None));
        }

        match body(tx).await {
            Ok((tx, value)) => {
                tx.commit().await?;
                Ok((true, Some(value)))
            }
            Err(e) => Err(e),
        }
    }
}

/// Ties `PgScheduledTaskStore` and `PgJobStore` into a runnable background
/// task: on each tick, finds due tasks and fires the ones that win their
/// per-task advisory lock.
pub struct SchedulerDriver {
    scheduled: PgScheduledTaskStore,
    jobs: PgJobStore,
    clock: Arc<dyn TimeProvider>,
    config: SchedulerConfig,
}

impl SchedulerDriver {
    pub fn new(
        scheduled: PgScheduledTaskStore,
        jobs: PgJobStore,
        clock: Arc<dyn TimeProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            scheduled,
            jobs,
            clock,
            config,
        }
    }

    /// Run the driver loop until `cancel` fires. Each tick's failure is
    /// logged and the loop continues on the next natural tick.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.tick_interval_secs.max(1),
        ));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(%err, "scheduler tick failed");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn tick(&self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool_begin().await?;
        let due = self.scheduled.find_due(&mut tx, now, self.config.due_row_limit).await?;
        tx.commit().await?;

        for task in due {
            if let Err(err) = self.fire_one(task, now).await {
                tracing::error!(%err, "scheduled task fire failed");
            }
        }
        Ok(())
    }

    async fn pool_begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.jobs.pool().begin().await?)
    }

    /// Job type enqueued for a scheduled task, read from its payload's
    /// `job_type` field and falling back to `"scheduled"`.
    fn job_type_for(task: &ScheduledJob) -> Result<JobType, StoreError> {
        JobType::new(
            task.payload
                .get("job_type")
                .and_then(Value::as_str)
                .unwrap_or("scheduled")
                .to_string(),
        )
    }

    /// Evaluate the overrun policy outside the task-lock transaction — the
    /// state reads and the prior-pending cleanup go through the job queue's
    /// own pool-scoped operations rather than the scheduler's transaction
    /// (see `DESIGN.md` on why `JobQueue` methods aren't tx-enrolled).
    async fn should_enqueue(&self, task: &ScheduledJob) -> Result<bool, StoreError> {
        match &task.overrun_policy {
            None | Some(OverrunPolicy::Allow) | Some(OverrunPolicy::FenceByFireKey) => Ok(true),
            Some(OverrunPolicy::SkipIfStateMatches(mask)) => {
                let state = self.jobs.job_states_by_task_name(&task.task_name).await?;
                Ok(!state.contains(*mask))
            }
            Some(OverrunPolicy::ReplaceIfStateMatches(mask)) => {
                let state = self.jobs.job_states_by_task_name(&task.task_name).await?;
                if state.contains(*mask) {
                    let job_type = Self::job_type_for(task)?;
                    self.jobs
                        .delete_by_payload_field(
                            &job_type,
                            "scheduler_task_name",
                            &serde_json::json!(task.task_name),
                        )
                        .await?;
                }
                Ok(true)
            }
        }
    }

    async fn fire_one(&self, task: ScheduledJob, now: DateTime<Utc>) -> Result<(), StoreError> {
        let should_enqueue = self.should_enqueue(&task).await?;

        let (locked, _) = self
            .scheduled
            .try_with_task_lock(&task.task_name, |mut tx| {
                let scheduled = self.scheduled.clone();
                let jobs = self.jobs.clone();
                let task = task.clone();
                async move {
                    let mut fenced_out = false;
                    if let Some(OverrunPolicy::FenceByFireKey) = &task.overrun_policy {
                        let fire_key =
                            OverrunPolicy::fire_key_for(&task.task_name, task.scheduled_interval, now);
                        let set = scheduled.try_set_fire_key(&mut tx, task.id, &fire_key, now).await?;
                        fenced_out = !set;
                    }

                    if should_enqueue && !fenced_out {
                        let job_type = Self::job_type_for(&task)?;
                        let mut payload = task.payload.clone();
                        if let Value::Object(map) = &mut payload {
                            map.insert(
                                "scheduler_task_name".to_string(),
                                serde_json::json!(task.task_name),
                            );
                        }
                        let mut metadata = serde_json::json!({
                            "scheduler": { "task_name": task.task_name }
                        });
                        if let Some(OverrunPolicy::FenceByFireKey) = &task.overrun_policy {
                            let fire_key = OverrunPolicy::fire_key_for(
                                &task.task_name,
                                task.scheduled_interval,
                                now,
                            );
                            metadata["scheduler"]["fire_key"] = serde_json::json!(fire_key);
                        }
                        let mut req = NewJob::new(job_type, payload);
                        req.metadata = metadata;
                        jobs.create_in_tx(&mut tx, req).await?;
                    }

                    scheduled.mark_queued(&mut tx, task.id, now).await?;
                    Ok((tx, ()))
                }
            })
            .await?;

        if !locked {
            tracing::debug!(task_name = %task.task_name, "scheduler tick: task lock held elsewhere, skipping");
        }
        Ok(())
    }
}
