//! PostgreSQL implementation of the jobhold job execution substrate.
//!
//! Every `*Store` trait from `jobhold-core` has exactly one concrete
//! implementation here, named `Pg<Thing>Store`. Two background drivers
//! (`SchedulerDriver`, `ReaperDriver`) turn the scheduled-task and reaper
//! primitives into runnable tasks a binary can `tokio::spawn`.
//!
//! # Database Schema
//!
//! See `migrations/` for the full set of tables this crate expects:
//! `jobs`, `scheduled_jobs`, `job_meta`, `job_results`, `events`, `sites`,
//! `sources`, `source_secrets`, `alerts`, `seen_domains`,
//! `domain_allowlist`, `http_alert_sinks`, `sink_secrets`, `secrets`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobhold_postgres::{PgJobStore, SchedulerDriver};
//! use jobhold_core::SystemClock;
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! let pool = PgPool::connect("postgres://localhost/jobhold").await?;
//! let jobs = PgJobStore::new(pool.clone(), Arc::new(SystemClock));
//! ```

mod alert;
mod allowlist;
mod event;
mod fnv;
mod job;
mod job_result;
mod notify;
mod query;
mod reaper;
mod scheduler;
mod secret;
mod seen_domain;
mod sink;
mod site;
mod source;

pub use alert::PgAlertStore;
pub use allowlist::PgDomainAllowlistStore;
pub use event::PgEventStore;
pub use job::PgJobStore;
pub use job_result::PgJobResultStore;
pub use notify::{channel_name, wait_for_notification};
pub use query::{Condition, OrderDir, Param, QueryBuilder, UNSET};
pub use reaper::{PgReaper, ReaperDriver};
pub use scheduler::{PgScheduledTaskStore, SchedulerDriver};
pub use secret::PgSecretStore;
pub use seen_domain::PgSeenDomainStore;
pub use sink::PgHttpAlertSinkStore;
pub use site::PgSiteStore;
pub use source::PgSourceStore;
