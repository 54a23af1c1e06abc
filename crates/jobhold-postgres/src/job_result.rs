//! Postgres implementation of the optional terminal job artifact.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use jobhold_core::{JobResult, JobResultStore, StoreError};

#[derive(sqlx::FromRow)]
struct JobResultRow {
    job_id: Option<Uuid>,
    job_type: String,
    result: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobResultRow> for JobResult {
    fn from(row: JobResultRow) -> Self {
        JobResult {
            job_id: row.job_id,
            job_type: row.job_type,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgJobResultStore {
    pool: PgPool,
    /// `None` means every job type may persist a result. `Some` restricts
    /// `put`/`list_by_job_type` to the given set, the way only a subset of
    /// job types in a deployment actually produce a terminal artifact.
    supported_job_types: Option<HashSet<String>>,
}

impl PgJobResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            supported_job_types: None,
        }
    }

    pub fn with_supported_job_types(mut self, job_types: impl IntoIterator<Item = String>) -> Self {
        self.supported_job_types = Some(job_types.into_iter().collect());
        self
    }

    fn check_configured(&self, job_type: &str) -> Result<(), StoreError> {
        match &self.supported_job_types {
            Some(allowed) if !allowed.contains(job_type) => Err(StoreError::JobResultsNotConfigured),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl JobResultStore for PgJobResultStore {
    async fn put(&self, job_id: Uuid, job_type: &str, result: Value) -> Result<JobResult, StoreError> {
        self.check_configured(job_type)?;
        let row = sqlx::query_as::<_, JobResultRow>(
            r#"
            INSERT INTO job_results (job_id, job_type, result, created_at, updated_at)
            VALUES ($1, $2, $3, now(), now())
            ON CONFLICT (job_id) DO UPDATE
            SET job_type = excluded.job_type, result = excluded.result, updated_at = now()
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(job_type)
        .bind(result)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_by_job_id(&self, job_id: Uuid) -> Result<JobResult, StoreError> {
        let row = sqlx::query_as::<_, JobResultRow>("SELECT * FROM job_results WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("job_result", job_id.to_string()))?;
        Ok(row.into())
    }

    async fn get_by_alert_id(&self, alert_id: &str) -> Result<Vec<JobResult>, StoreError> {
        let rows = sqlx::query_as::<_, JobResultRow>(
            "SELECT * FROM job_results WHERE result->>'alert_id' = $1 ORDER BY created_at DESC",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobResult::from).collect())
    }

    async fn list_by_job_type(&self, job_type: &str) -> Result<Vec<JobResult>, StoreError> {
        self.check_configured(job_type)?;
        let rows = sqlx::query_as::<_, JobResultRow>(
            "SELECT * FROM job_results WHERE job_type = $1 ORDER BY created_at DESC",
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobResult::from).collect())
    }
}
