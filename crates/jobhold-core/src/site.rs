//! Site CRUD.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub source_id: Option<Uuid>,
    pub url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub source_id: Option<Uuid>,
    pub url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub source_id: Option<Option<Uuid>>,
    pub url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct SiteFilter {
    pub source_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub name_search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn create(&self, req: NewSite) -> Result<Site, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Site, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Site, StoreError>;
    async fn update(&self, id: Uuid, update: SiteUpdate) -> Result<Site, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_with_filters(&self, filter: SiteFilter) -> Result<Vec<Site>, StoreError>;
}
