//! Secret store: values are encrypted at rest by the implementation;
//! this module only describes the backend-agnostic shape and refresh
//! bookkeeping. Key management (rotation, KMS) is out of scope;
//! the implementation takes a 32-byte key as an opaque constructor argument.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// A secret's metadata, as returned by `List` — never the plaintext value.
#[derive(Debug, Clone)]
pub struct SecretSummary {
    pub id: Uuid,
    pub name: String,
    pub refresh_enabled: bool,
    pub refresh_interval: Option<Duration>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_refresh_status: Option<String>,
    pub last_refresh_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A secret with its decrypted value, as returned by `GetByID`/`GetByName`.
#[derive(Debug, Clone)]
pub struct Secret {
    pub summary: SecretSummary,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub value: String,
    pub refresh_enabled: bool,
    pub refresh_interval: Option<Duration>,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create(&self, req: NewSecret) -> Result<SecretSummary, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Secret, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Secret, StoreError>;
    async fn set_value(&self, id: Uuid, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Never includes plaintext values.
    async fn list(&self) -> Result<Vec<SecretSummary>, StoreError>;

    /// Candidates due for refresh: never-refreshed first, then oldest
    /// `last_refreshed_at`.
    async fn find_due_for_refresh(&self, limit: i64) -> Result<Vec<SecretSummary>, StoreError>;

    async fn record_refresh_result(
        &self,
        id: Uuid,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}
