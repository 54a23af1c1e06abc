//! Seen-domain tracking: upsert-by-`(site_id, domain, scope)` hit counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct SeenDomain {
    pub site_id: Uuid,
    pub domain: String,
    pub scope: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub hit_count: i64,
}

#[async_trait]
pub trait SeenDomainStore: Send + Sync {
    /// Upsert by `(site_id, domain, scope)`: insert with `hit_count=1`,
    /// else bump `last_seen_at` and increment `hit_count`.
    async fn record_seen(
        &self,
        site_id: Uuid,
        domain: &str,
        scope: &str,
    ) -> Result<SeenDomain, StoreError>;

    async fn get(&self, site_id: Uuid, domain: &str, scope: &str) -> Result<SeenDomain, StoreError>;

    async fn list_for_site(&self, site_id: Uuid) -> Result<Vec<SeenDomain>, StoreError>;
}
