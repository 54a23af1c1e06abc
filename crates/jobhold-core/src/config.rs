//! Typed configuration surface.
//!
//! Parsing environment variables, config files, or CLI flags is out of
//! scope — these structs are plain data a caller's own config loader
//! populates (they derive `serde::Deserialize` so that loader can be
//! whatever the embedding application already uses) and passes in as
//! constructor arguments. Every struct ships sensible numeric defaults, so a
//! caller who configures nothing still gets correct behavior.

use chrono::Duration;
use serde::Deserialize;

/// Duration configuration fields are expressed in whole seconds for
/// straightforward (de)serialization; converted to `chrono::Duration` at the
/// point of use.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    pub default_max_retries: i32,
    pub default_retry_delay_secs: i64,
    pub default_lease_secs: i64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: crate::job::DEFAULT_MAX_RETRIES,
            default_retry_delay_secs: crate::job::DEFAULT_RETRY_DELAY.num_seconds(),
            default_lease_secs: 60,
        }
    }
}

impl JobQueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::seconds(self.default_retry_delay_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::seconds(self.default_lease_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub tick_interval_secs: u64,
    pub stale_pending_max_age_secs: i64,
    pub stale_pending_batch_size: i64,
    pub completed_retention_secs: i64,
    pub failed_retention_secs: i64,
    pub terminal_delete_batch_size: i64,
    pub job_results_retention_secs: i64,
    pub job_results_delete_batch_size: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            stale_pending_max_age_secs: 3600,
            stale_pending_batch_size: 500,
            completed_retention_secs: 7 * 24 * 3600,
            failed_retention_secs: 30 * 24 * 3600,
            terminal_delete_batch_size: 500,
            job_results_retention_secs: 30 * 24 * 3600,
            job_results_delete_batch_size: 500,
        }
    }
}

impl ReaperConfig {
    pub fn stale_pending_max_age(&self) -> Duration {
        Duration::seconds(self.stale_pending_max_age_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::seconds(self.completed_retention_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::seconds(self.failed_retention_secs)
    }

    pub fn job_results_retention(&self) -> Duration {
        Duration::seconds(self.job_results_retention_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub due_row_limit: i64,
    pub default_lease_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            due_row_limit: 50,
            default_lease_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_queue_config_has_expected_defaults() {
        let cfg = JobQueueConfig::default();
        assert_eq!(cfg.default_max_retries, 3);
        assert_eq!(cfg.retry_delay(), Duration::seconds(30));
    }

    #[test]
    fn reaper_config_has_positive_defaults() {
        let cfg = ReaperConfig::default();
        assert!(cfg.stale_pending_max_age() > Duration::zero());
        assert!(cfg.stale_pending_batch_size > 0);
    }
}
