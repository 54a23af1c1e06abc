//! Source CRUD with a named-secrets join table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub config: Value,
    pub secret_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub kind: String,
    pub config: Value,
    pub secrets: Vec<String>,
}

/// `secrets: None` leaves existing associations alone; `Some(vec![])` clears
/// them; `Some(names)` replaces them wholesale.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub config: Option<Value>,
    pub secrets: Option<Vec<String>>,
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn create(&self, req: NewSource) -> Result<Source, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Source, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Source, StoreError>;
    async fn update(&self, id: Uuid, update: SourceUpdate) -> Result<Source, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Source>, StoreError>;
}
