//! HTTP alert sink registry with a named-secrets join table.
//!
//! Actual HTTP delivery is out of scope; this store only persists the
//! sink's configuration and its secret associations.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct HttpAlertSink {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub headers: Value,
    pub enabled: bool,
    pub secret_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewHttpAlertSink {
    pub name: String,
    pub url: String,
    pub headers: Value,
    pub enabled: bool,
    pub secrets: Vec<String>,
}

/// Same "non-nil replaces, nil leaves alone" convention as `SourceUpdate`.
#[derive(Debug, Clone, Default)]
pub struct HttpAlertSinkUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub headers: Option<Value>,
    pub enabled: Option<bool>,
    pub secrets: Option<Vec<String>>,
}

#[async_trait]
pub trait HttpAlertSinkStore: Send + Sync {
    async fn create(&self, req: NewHttpAlertSink) -> Result<HttpAlertSink, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<HttpAlertSink, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<HttpAlertSink, StoreError>;
    async fn update(
        &self,
        id: Uuid,
        update: HttpAlertSinkUpdate,
    ) -> Result<HttpAlertSink, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<HttpAlertSink>, StoreError>;
}
