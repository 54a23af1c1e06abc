//! Unified error taxonomy for the job execution substrate.
//!
//! Every store method returns `Result<_, StoreError>`. Validation errors are
//! constructed before any transaction opens; row-shape sentinels surface
//! contention and lifecycle violations without treating them as failures.

use thiserror::Error;
use uuid::Uuid;

/// The single error type returned by every store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller-supplied input failed validation before any query ran.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No row matched the given identity.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique constraint on a caller-chosen name was violated.
    #[error("{entity} name already exists: {name}")]
    NameExists { entity: &'static str, name: String },

    /// The job exists but is not in a state from which it can be deleted.
    #[error("job {id} is not deletable in its current status")]
    JobNotDeletable { id: Uuid },

    /// The job exists, is deletable by status, but is currently leased.
    #[error("job {id} is currently reserved by a worker")]
    JobReserved { id: Uuid },

    /// `ReserveNext` found no eligible row. Not logged as an error.
    #[error("no jobs available")]
    NoJobsAvailable,

    /// Job results are not configured for this deployment (no `job_results` sink wired up).
    #[error("job results are not configured")]
    JobResultsNotConfigured,

    /// A wrapped database-driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A malformed cursor, JSON payload, or other (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn name_exists(entity: &'static str, name: impl Into<String>) -> Self {
        StoreError::NameExists {
            entity,
            name: name.into(),
        }
    }

    /// True for conditions that are routine contention rather than failures —
    /// callers should not log these at error level.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::NoJobsAvailable)
    }
}

/// Maps a raw `sqlx::Error` to a `StoreError`, recognising Postgres
/// `SQLSTATE` codes for unique and foreign-key violations so callers get a
/// named sentinel instead of a bare database error.
///
/// `entity` / `name_of` are used only when the error turns out to be a
/// unique-violation, to build a `NameExists` sentinel; `fk_entity` is used
/// for a foreign-key violation to build a `NotFound` sentinel.
pub fn map_constraint_violation(
    err: sqlx::Error,
    entity: &'static str,
    name_of: impl FnOnce() -> String,
    fk_entity: Option<&'static str>,
) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some("23505") => return StoreError::name_exists(entity, name_of()),
            Some("23503") => {
                if let Some(fk_entity) = fk_entity {
                    return StoreError::not_found(fk_entity, "referenced row");
                }
            }
            _ => {}
        }
    }
    StoreError::from(err)
}
