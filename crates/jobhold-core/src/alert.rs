//! Alert store: delivery status writeback and idempotent resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub site_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub severity: String,
    pub message: String,
    pub delivery_status: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `Alert` joined with its site's name, avoiding an N+1 lookup in
/// `ListWithSiteNames`.
#[derive(Debug, Clone)]
pub struct AlertWithSiteName {
    pub alert: Alert,
    pub site_name: String,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub site_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub site_id: Option<Uuid>,
    pub severity: Option<String>,
    pub unresolved_only: bool,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, req: NewAlert) -> Result<Alert, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Alert, StoreError>;

    /// Requires `id` parse as UUID upstream of this call; a non-parseable
    /// caller-supplied id should be rejected as `AlertNotFound` before this
    /// is ever reached.
    async fn update_delivery_status(&self, id: Uuid, status: &str) -> Result<(), StoreError>;

    /// Only updates rows where `resolved_at IS NULL`; already-resolved
    /// alerts surface `NotFound` rather than succeeding silently.
    async fn resolve(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_with_site_names(
        &self,
        filter: AlertFilter,
    ) -> Result<Vec<AlertWithSiteName>, StoreError>;
}
