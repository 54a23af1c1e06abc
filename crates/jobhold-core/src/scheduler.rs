//! Declarative periodic tasks that fire into the job queue.
//!
//! The store-level primitives (`FindDue`, `MarkQueued`, `TryWithTaskLock`)
//! are transaction-scoped by design — a scheduler tick must hold the due
//! row locked while it evaluates the overrun policy and enqueues — so they
//! live as inherent methods on `jobhold_postgres::PgScheduledTaskStore`
//! rather than behind a trait here. This module holds the backend-agnostic
//! domain types: the `ScheduledJob` row shape and the `OverrunPolicy` tagged
//! variants the scheduler dispatches on.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::JobStateMask;

/// A persisted scheduled-task row.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub task_name: String,
    pub payload: Value,
    pub scheduled_interval: Duration,
    pub last_queued_at: Option<DateTime<Utc>>,
    pub overrun_policy: Option<OverrunPolicy>,
    pub active_fire_key: Option<String>,
    pub active_fire_key_set_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// A task is due iff it has never been queued, or its last queue time
    /// plus its interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_queued_at {
            None => true,
            Some(last) => last + self.scheduled_interval <= now,
        }
    }
}

/// Request to register (or redefine) a scheduled task.
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub task_name: String,
    pub payload: Value,
    pub scheduled_interval: Duration,
    pub overrun_policy: Option<OverrunPolicy>,
}

impl NewScheduledJob {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.task_name.trim().is_empty() {
            return Err(StoreError::invalid("task_name must not be empty"));
        }
        if self.scheduled_interval <= Duration::zero() {
            return Err(StoreError::invalid("scheduled_interval must be > 0"));
        }
        Ok(())
    }
}

/// Rule deciding whether a due scheduled task is actually enqueued when
/// prior work for it may still be outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrunPolicy {
    /// Always enqueue, regardless of in-flight state.
    Allow,
    /// Skip enqueue iff `JobStatesByTaskName & mask != 0`.
    SkipIfStateMatches(JobStateMask),
    /// If state matches mask, delete prior pending jobs for the task (by
    /// payload field), then enqueue.
    ReplaceIfStateMatches(JobStateMask),
    /// Compute a deterministic fire key for the current interval window;
    /// enqueue only if no other fire currently holds the fence.
    FenceByFireKey,
}

impl OverrunPolicy {
    /// Deterministic fire key for `FenceByFireKey`: the task name and the
    /// interval-aligned window start, so two fires within the same window
    /// compute the same key.
    pub fn fire_key_for(task_name: &str, interval: Duration, now: DateTime<Utc>) -> String {
        let interval_secs = interval.num_seconds().max(1);
        let window = now.timestamp().div_euclid(interval_secs);
        format!("{task_name}:{window}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_due_when_never_queued() {
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            task_name: "t".into(),
            payload: Value::Null,
            scheduled_interval: Duration::minutes(5),
            last_queued_at: None,
            overrun_policy: None,
            active_fire_key: None,
            active_fire_key_set_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(job.is_due(Utc::now()));
    }

    #[test]
    fn is_due_respects_interval() {
        let now = Utc::now();
        let mut job = ScheduledJob {
            id: Uuid::new_v4(),
            task_name: "t".into(),
            payload: Value::Null,
            scheduled_interval: Duration::minutes(5),
            last_queued_at: Some(now),
            overrun_policy: None,
            active_fire_key: None,
            active_fire_key_set_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!job.is_due(now + Duration::minutes(1)));
        job.last_queued_at = Some(now - Duration::minutes(6));
        assert!(job.is_due(now));
    }

    #[test]
    fn new_scheduled_job_rejects_nonpositive_interval() {
        let req = NewScheduledJob {
            task_name: "t".into(),
            payload: Value::Null,
            scheduled_interval: Duration::zero(),
            overrun_policy: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn fire_key_is_stable_within_a_window() {
        let interval = Duration::minutes(5);
        let now = Utc::now();
        let k1 = OverrunPolicy::fire_key_for("t", interval, now);
        let k2 = OverrunPolicy::fire_key_for("t", interval, now + Duration::seconds(1));
        assert_eq!(k1, k2);
        let k3 = OverrunPolicy::fire_key_for("t", interval, now + interval);
        assert_ne!(k1, k3);
    }
}
