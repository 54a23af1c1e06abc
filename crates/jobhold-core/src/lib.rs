//! # jobhold-core
//!
//! Backend-agnostic traits and domain types for a durable, Postgres-backed
//! job execution substrate.
//!
//! ## Core Concepts
//!
//! - [`job::Job`] / [`job::JobQueue`] — durable work items, reserved under
//!   `SELECT ... FOR UPDATE SKIP LOCKED`, leased to a single worker at a
//!   time, retried with backoff on failure.
//! - [`event::Event`] / [`event::EventStore`] — an append-only log of
//!   observations attached to a job, queryable by offset or keyset
//!   ([`cursor::Cursor`]) pagination.
//! - [`scheduler::ScheduledJob`] — cron-like recurring task definitions that
//!   a driver loop turns into `Job` rows when due.
//! - [`reaper::Reaper`] — crash recovery and retention: expired leases,
//!   stale pending jobs, and old terminal rows are reclaimed or deleted on
//!   a timer.
//!
//! Adjacent to the job queue, this crate also describes the site/source/
//! alert/secret/domain-allowlist entities a job-driven crawling-and-alerting
//! application built on top of the queue needs.
//! These are plain CRUD stores; none of them carry queue semantics of their
//! own.
//!
//! ## Key Invariants
//!
//! 1. A job has at most one owner at a time — enforced by the store's use
//!    of row locking, not by this crate.
//! 2. Failure always re-evaluates `attempts` against `max_retries`: the
//!    store decides `Pending` (retry) vs `Failed` (exhausted), callers
//!    never do this arithmetic themselves.
//! 3. Offset and keyset pagination are mutually exclusive per request —
//!    [`event::EventListOptions::is_keyset`] is the single source of truth
//!    for which mode a given request uses.
//! 4. Secrets never cross the [`secret::SecretStore`] boundary in plaintext
//!    except via `Secret::value` on direct, single-secret reads.
//!
//! ## What This Is Not
//!
//! This crate is **not**:
//! - A scheduler implementation (it describes the shape; drivers live in
//!   `jobhold-postgres`)
//! - Cross-database portable (the design deliberately targets Postgres;
//!   see `DESIGN.md`)
//! - An HTTP delivery mechanism for alerts (sinks are persisted config,
//!   not a dispatcher)

pub mod alert;
pub mod allowlist;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod job;
pub mod job_result;
pub mod reaper;
pub mod scheduler;
pub mod secret;
pub mod seen_domain;
pub mod sink;
pub mod site;
pub mod source;
pub mod time;

pub use crate::error::StoreError;

pub use alert::{Alert, AlertFilter, AlertStore, AlertWithSiteName, NewAlert};
pub use allowlist::{DomainAllowlistEntry, DomainAllowlistStore, NewDomainAllowlistEntry, GLOBAL_SCOPE};
pub use config::{JobQueueConfig, ReaperConfig, SchedulerConfig};
pub use cursor::{Cursor, SortBy, SortDir};
pub use event::{
    Event, EventCategory, EventCountOptions, EventListOptions, EventPage, EventStore, NewEvent,
};
pub use job::{
    Job, JobQueue, JobStateMask, JobStatus, JobType, NewJob, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY,
};
pub use job_result::{JobResult, JobResultStore};
pub use reaper::Reaper;
pub use scheduler::{NewScheduledJob, OverrunPolicy, ScheduledJob};
pub use secret::{NewSecret, Secret, SecretStore, SecretSummary};
pub use seen_domain::{SeenDomain, SeenDomainStore};
pub use sink::{HttpAlertSink, HttpAlertSinkStore, HttpAlertSinkUpdate, NewHttpAlertSink};
pub use site::{NewSite, Site, SiteFilter, SiteStore, SiteUpdate};
pub use source::{NewSource, Source, SourceStore, SourceUpdate};
pub use time::{FixedClock, SystemClock, TimeProvider};

pub use async_trait::async_trait;
