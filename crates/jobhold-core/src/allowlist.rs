//! Domain allowlist: scoped entries with a `global` fallback scope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone)]
pub struct DomainAllowlistEntry {
    pub id: Uuid,
    pub scope: String,
    pub domain_pattern: String,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDomainAllowlistEntry {
    pub scope: String,
    pub domain_pattern: String,
    pub priority: i32,
    pub enabled: bool,
}

#[async_trait]
pub trait DomainAllowlistStore: Send + Sync {
    async fn create(
        &self,
        req: NewDomainAllowlistEntry,
    ) -> Result<DomainAllowlistEntry, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Enabled entries matching `scope=$1 OR scope='global'`, ordered by
    /// `priority ASC, created_at ASC`.
    async fn get_for_scope(
        &self,
        scope: &str,
    ) -> Result<Vec<DomainAllowlistEntry>, StoreError>;
}
