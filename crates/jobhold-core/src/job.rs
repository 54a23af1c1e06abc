//! The priority job queue core: create, reserve, heartbeat, complete,
//! fail, and the bookkeeping a periodic-task scheduler needs to introspect
//! in-flight work for a given task name.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// A job queue name. Validated to be non-empty, lowercase ASCII, and safe to
/// embed in a `pg_notify` channel name (`job_added_<type>`) and an advisory
/// lock hash key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(value: impl Into<String>) -> Result<Self, StoreError> {
        let value = value.into();
        if value.is_empty() {
            return Err(StoreError::invalid("job type must not be empty"));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        {
            return Err(StoreError::invalid(
                "job type must be lowercase ascii, digits, '_' or '-'",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a `JobType` from a value already persisted by a prior, validated
    /// `Create` — used when hydrating rows read back from the database,
    /// where re-validating on every read would be pure overhead.
    pub fn from_db(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// The two statuses `DeleteOldJobs` is allowed to operate on.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::invalid(format!("unknown job status: {other}"))),
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i16,
    pub payload: Value,
    pub metadata: Value,
    pub session_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub is_test: bool,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// `scheduler.task_name` as recorded by convention in `metadata`, if any.
    pub fn scheduler_task_name(&self) -> Option<&str> {
        self.metadata.get("scheduler")?.get("task_name")?.as_str()
    }

    /// `scheduler.fire_key` as recorded by convention in `metadata`, if any.
    pub fn scheduler_fire_key(&self) -> Option<&str> {
        self.metadata.get("scheduler")?.get("fire_key")?.as_str()
    }
}

/// Default retry count applied to a new job when the caller doesn't specify one.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default delay before a failed, still-retryable job becomes eligible again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::seconds(30);

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub priority: i16,
    pub payload: Value,
    pub metadata: Value,
    pub session_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub is_test: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: Value) -> Self {
        Self {
            job_type,
            priority: 0,
            payload,
            metadata: Value::Object(Default::default()),
            session_id: None,
            site_id: None,
            source_id: None,
            is_test: false,
            scheduled_at: None,
            max_retries: None,
        }
    }

    /// Validates the create request: non-empty payload, priority in
    /// [0, 100]. Returns the effective `max_retries` after applying the
    /// `is_test` override.
    pub fn validate(&self) -> Result<i32, StoreError> {
        if !(0..=100).contains(&self.priority) {
            return Err(StoreError::invalid("priority must be in [0, 100]"));
        }
        if self.payload.is_null() {
            return Err(StoreError::invalid("payload must not be empty"));
        }
        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let max_retries = if self.is_test && max_retries <= 0 {
            0
        } else {
            max_retries
        };
        Ok(max_retries)
    }
}

/// Bitmask over a scheduled task's in-flight job states, returned by
/// `JobStatesByTaskName`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStateMask(u8);

impl JobStateMask {
    pub const NONE: JobStateMask = JobStateMask(0);
    pub const RUNNING: JobStateMask = JobStateMask(1 << 0);
    pub const PENDING: JobStateMask = JobStateMask(1 << 1);
    pub const RETRYING: JobStateMask = JobStateMask(1 << 2);

    pub fn contains(self, other: JobStateMask) -> bool {
        (self.0 & other.0) != 0
    }

    pub fn union(self, other: JobStateMask) -> JobStateMask {
        JobStateMask(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> JobStateMask {
        JobStateMask(bits & 0b111)
    }
}

impl std::ops::BitOr for JobStateMask {
    type Output = JobStateMask;
    fn bitor(self, rhs: JobStateMask) -> JobStateMask {
        self.union(rhs)
    }
}

/// Single-table operations over the `jobs` table.
///
/// `CreateInTx` and `requeueExpired` are intentionally not part of this
/// trait: the former needs to be enrolled in a caller-chosen transaction
/// shared with `ScheduledTaskStore`, and the latter is an internal step of
/// `ReserveNext`. Both live as inherent methods on the concrete Postgres
/// implementation — see `jobhold-postgres` and the crate-level note in
/// `DESIGN.md` on why this substrate does not abstract transaction identity
/// behind a backend-agnostic trait.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn create(&self, req: NewJob) -> Result<Job, StoreError>;

    async fn reserve_next(&self, job_type: &JobType, lease: Duration) -> Result<Job, StoreError>;

    async fn heartbeat(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError>;

    async fn complete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn fail(&self, id: Uuid, err: &str) -> Result<bool, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn delete_by_payload_field(
        &self,
        job_type: &JobType,
        field: &str,
        value: &Value,
    ) -> Result<u64, StoreError>;

    async fn job_states_by_task_name(&self, task_name: &str) -> Result<JobStateMask, StoreError>;

    async fn running_job_exists_by_task_name(&self, task_name: &str) -> Result<bool, StoreError> {
        Ok(self
            .job_states_by_task_name(task_name)
            .await?
            .contains(JobStateMask::RUNNING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_rejects_empty_and_uppercase() {
        assert!(JobType::new("").is_err());
        assert!(JobType::new("Browser").is_err());
        assert!(JobType::new("browser").is_ok());
        assert!(JobType::new("job_type-1").is_ok());
    }

    #[test]
    fn new_job_validate_enforces_priority_range() {
        let job = NewJob::new(JobType::new("browser").unwrap(), serde_json::json!({}));
        assert!(job.validate().is_ok());

        let mut bad = job.clone();
        bad.priority = 101;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn new_job_validate_forces_zero_retries_for_test_jobs() {
        let mut job = NewJob::new(JobType::new("browser").unwrap(), serde_json::json!({}));
        job.is_test = true;
        job.max_retries = Some(-1);
        assert_eq!(job.validate().unwrap(), 0);
    }

    #[test]
    fn job_state_mask_bitor_and_contains() {
        let mask = JobStateMask::RUNNING | JobStateMask::PENDING;
        assert!(mask.contains(JobStateMask::RUNNING));
        assert!(mask.contains(JobStateMask::PENDING));
        assert!(!mask.contains(JobStateMask::RETRYING));
        assert!(!mask.is_empty());
        assert!(JobStateMask::NONE.is_empty());
    }
}
