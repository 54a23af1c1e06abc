//! Lease/retention reaper: rescue abandoned work, bound storage growth.

use async_trait::async_trait;
use chrono::Duration;

use crate::error::StoreError;
use crate::job::JobStatus;

#[async_trait]
pub trait Reaper: Send + Sync {
    /// Move `pending` jobs older than `max_age` to `failed`.
    async fn fail_stale_pending_jobs(
        &self,
        max_age: Duration,
        batch_size: i64,
    ) -> Result<u64, StoreError>;

    /// Delete jobs in a terminal `status` whose completion predates `max_age`.
    async fn delete_old_jobs(
        &self,
        status: JobStatus,
        max_age: Duration,
        batch_size: i64,
    ) -> Result<u64, StoreError>;

    /// Delete `job_results` rows older than `max_age`, optionally scoped to
    /// one job type.
    async fn delete_old_job_results(
        &self,
        job_type: Option<&str>,
        max_age: Duration,
        batch_size: i64,
    ) -> Result<u64, StoreError>;
}

/// Validates the reaper's shared batch/age preconditions: requires a
/// positive `batch_size` and `max_age`.
pub fn validate_batch_params(max_age: Duration, batch_size: i64) -> Result<(), StoreError> {
    if max_age <= Duration::zero() {
        return Err(StoreError::invalid("max_age must be > 0"));
    }
    if batch_size <= 0 {
        return Err(StoreError::invalid("batch_size must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonpositive_max_age_or_batch() {
        assert!(validate_batch_params(Duration::zero(), 10).is_err());
        assert!(validate_batch_params(Duration::seconds(1), 0).is_err());
        assert!(validate_batch_params(Duration::seconds(1), -5).is_err());
        assert!(validate_batch_params(Duration::seconds(1), 10).is_ok());
    }
}
