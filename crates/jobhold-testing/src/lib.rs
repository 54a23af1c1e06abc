//! Shared fixtures for integration tests against a migrated Postgres database.
//!
//! Paired with `#[sqlx::test(migrations = "../../migrations")]`, which hands
//! each test function an isolated, already-migrated database.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub use jobhold_core::{FixedClock, TimeProvider};

use jobhold_core::{JobType, NewJob};

static TRACING_INIT: std::sync::Once = std::sync::Once::new();

/// Installs a `tracing_subscriber::fmt` subscriber, once per process, so
/// `tracing::info!`/`warn!` calls inside the store under test are visible
/// when a test fails. Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Builds and inserts a `jobs` row directly via SQL, bypassing `JobQueue`,
/// so tests can set up rows in states `Create` can't produce on its own
/// (e.g. already `running` with a specific lease).
pub struct JobFixture {
    job_type: String,
    status: String,
    priority: i16,
    payload: Value,
    metadata: Value,
    max_retries: i32,
    retry_count: i32,
    scheduled_at: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl JobFixture {
    pub fn new(job_type: &str) -> Self {
        let now = Utc::now();
        Self {
            job_type: job_type.to_string(),
            status: "pending".to_string(),
            priority: 0,
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
            max_retries: 3,
            retry_count: 0,
            scheduled_at: now,
            lease_expires_at: None,
            created_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    pub fn with_lease_expires_at(mut self, lease_expires_at: DateTime<Utc>) -> Self {
        self.lease_expires_at = Some(lease_expires_at);
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub async fn insert(self, pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, status, priority, payload, metadata,
                max_retries, retry_count, scheduled_at, lease_expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id)
        .bind(&self.job_type)
        .bind(&self.status)
        .bind(self.priority)
        .bind(&self.payload)
        .bind(&self.metadata)
        .bind(self.max_retries)
        .bind(self.retry_count)
        .bind(self.scheduled_at)
        .bind(self.lease_expires_at)
        .bind(self.created_at)
        .execute(pool)
        .await
        .expect("insert job fixture");
        id
    }

    /// Builds the equivalent `NewJob` request, for tests exercising `JobQueue::create`
    /// directly instead of inserting through raw SQL.
    pub fn as_new_job(&self) -> NewJob {
        let mut req = NewJob::new(
            JobType::new(self.job_type.clone()).expect("valid job type"),
            self.payload.clone(),
        );
        req.priority = self.priority;
        req.metadata = self.metadata.clone();
        req.max_retries = Some(self.max_retries);
        req
    }
}

/// Builds and inserts an `events` row directly via SQL.
pub struct EventFixture {
    session_id: Uuid,
    source_job_id: Option<Uuid>,
    event_type: String,
    event_data: Value,
    priority: i16,
    created_at: DateTime<Utc>,
}

impl EventFixture {
    pub fn new(event_type: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            source_job_id: None,
            event_type: event_type.to_string(),
            event_data: serde_json::json!({}),
            priority: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_source_job_id(mut self, job_id: Uuid) -> Self {
        self.source_job_id = Some(job_id);
        self
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub async fn insert(self, pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO events (id, session_id, source_job_id, event_type, event_data, priority, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(self.session_id)
        .bind(self.source_job_id)
        .bind(&self.event_type)
        .bind(&self.event_data)
        .bind(self.priority)
        .bind(self.created_at)
        .execute(pool)
        .await
        .expect("insert event fixture");
        id
    }
}

/// Builds and inserts a `scheduled_jobs` row directly via SQL.
pub struct ScheduledJobFixture {
    task_name: String,
    payload: Value,
    interval: Duration,
    last_queued_at: Option<DateTime<Utc>>,
}

impl ScheduledJobFixture {
    pub fn new(task_name: &str, interval: Duration) -> Self {
        Self {
            task_name: task_name.to_string(),
            payload: serde_json::json!({}),
            interval,
            last_queued_at: None,
        }
    }

    pub fn with_last_queued_at(mut self, last_queued_at: DateTime<Utc>) -> Self {
        self.last_queued_at = Some(last_queued_at);
        self
    }

    pub async fn insert(self, pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, task_name, payload, scheduled_interval_secs, last_queued_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            "#,
        )
        .bind(id)
        .bind(&self.task_name)
        .bind(&self.payload)
        .bind(self.interval.num_seconds())
        .bind(self.last_queued_at)
        .execute(pool)
        .await
        .expect("insert scheduled job fixture");
        id
    }
}

/// Runs `n` copies of `task` concurrently and collects their results, for
/// "N workers race for one row" exclusivity tests.
pub async fn spawn_concurrent<F, Fut, T>(n: usize, task: F) -> Vec<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let task = std::sync::Arc::new(task);
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let task = task.clone();
        handles.push(tokio::spawn(async move { task().await }));
    }
    let mut results = Vec::with_capacity(n);
    for handle in handles {
        results.push(handle.await.expect("fixture task panicked"));
    }
    results
}
