//! Optional terminal artifact keyed by `job_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct JobResult {
    /// `None` once the parent job has been deleted — the row survives,
    /// orphaned.
    pub job_id: Option<Uuid>,
    pub job_type: String,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobResultStore: Send + Sync {
    /// Upsert by `job_id` (unique).
    async fn put(&self, job_id: Uuid, job_type: &str, result: Value) -> Result<JobResult, StoreError>;

    async fn get_by_job_id(&self, job_id: Uuid) -> Result<JobResult, StoreError>;

    /// Reverse lookup by `result->>'alert_id'`.
    async fn get_by_alert_id(&self, alert_id: &str) -> Result<Vec<JobResult>, StoreError>;

    async fn list_by_job_type(&self, job_type: &str) -> Result<Vec<JobResult>, StoreError>;
}
