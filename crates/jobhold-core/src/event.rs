//! Bulk event ingestion and keyset-paginated retrieval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::cursor::{SortBy, SortDir};
use crate::error::StoreError;

/// A fixed set of event categories the offset-path filter understands, each
/// mapping to an `event_type` pattern (ILIKE or equality) chosen by the
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Network,
    Console,
    Security,
    Page,
    Action,
    Error,
    Screenshot,
    WorkerLog,
    JobFailure,
}

/// A persisted event row.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub session_id: Uuid,
    pub source_job_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub storage_key: Option<String>,
    pub priority: i16,
    pub should_process: bool,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// One row of a bulk-insert request.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub session_id: Uuid,
    pub source_job_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Option<Value>,
    pub storage_key: Option<String>,
    pub priority: Option<i16>,
}

impl NewEvent {
    /// Defaulted metadata (`{}` when absent) and priority (`0` when absent).
    pub fn effective_metadata(&self) -> Value {
        match &self.metadata {
            Some(v) if !matches!(v, Value::Object(m) if m.is_empty()) && !v.is_null() => {
                v.clone()
            }
            _ => Value::Object(Default::default()),
        }
    }

    pub fn effective_priority(&self) -> i16 {
        self.priority.unwrap_or(0)
    }
}

/// Options for `ListByJob`. Exactly one of `cursor_after` / `cursor_before`
/// may be set; setting both is a validation error. When neither is set, the
/// legacy offset path is used.
#[derive(Debug, Clone, Default)]
pub struct EventListOptions {
    pub source_job_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub category: Option<EventCategory>,
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub sort_dir: SortDir,
    pub limit: i64,
    pub offset: i64,
    pub cursor_after: Option<String>,
    pub cursor_before: Option<String>,
}

impl EventListOptions {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }

    /// Clamp limit to [1, 1000] (default 50) and offset to >= 0, and reject
    /// `cursor_after` + `cursor_before` both set.
    pub fn normalize(mut self) -> Result<Self, StoreError> {
        if self.cursor_after.is_some() && self.cursor_before.is_some() {
            return Err(StoreError::invalid(
                "cursor_after and cursor_before are mutually exclusive",
            ));
        }
        self.limit = self.limit.clamp(1, 1000);
        if self.offset < 0 {
            self.offset = 0;
        }
        Ok(self)
    }

    pub fn is_keyset(&self) -> bool {
        self.cursor_after.is_some() || self.cursor_before.is_some()
    }
}

/// A page of events plus the cursors needed to page further. The offset path
/// still populates `next_cursor`/`prev_cursor` when there's more to see, so a
/// caller can bootstrap keyset paging from an uncursored first request.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    /// Total row count, only populated on the offset path.
    pub total: Option<i64>,
}

/// Filters for `CountByJob`; when every field is `None` the count is served
/// from `job_meta.event_count` rather than a `COUNT(*)` scan.
#[derive(Debug, Clone, Default)]
pub struct EventCountOptions {
    pub source_job_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub category: Option<EventCategory>,
    pub search: Option<String>,
}

impl EventCountOptions {
    pub fn has_filters(&self) -> bool {
        self.event_type.is_some() || self.category.is_some() || self.search.is_some()
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn bulk_insert(&self, rows: Vec<NewEvent>, should_process: bool)
        -> Result<u64, StoreError>;

    async fn bulk_insert_copy(
        &self,
        rows: Vec<NewEvent>,
        should_process: bool,
    ) -> Result<u64, StoreError>;

    async fn bulk_insert_with_processing_flags(
        &self,
        rows: Vec<NewEvent>,
        should_process: HashMap<usize, bool>,
    ) -> Result<u64, StoreError>;

    async fn list_by_job(&self, opts: EventListOptions) -> Result<EventPage, StoreError>;

    async fn count_by_job(&self, opts: EventCountOptions) -> Result<i64, StoreError>;

    async fn mark_processed_by_ids(&self, ids: &[Uuid]) -> Result<u64, StoreError>;

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_metadata_defaults_empty_object_on_none_or_null() {
        let mut row = NewEvent {
            session_id: Uuid::new_v4(),
            source_job_id: None,
            event_type: "page.load".into(),
            event_data: Value::Null,
            metadata: None,
            storage_key: None,
            priority: None,
        };
        assert_eq!(row.effective_metadata(), Value::Object(Default::default()));

        row.metadata = Some(Value::Null);
        assert_eq!(row.effective_metadata(), Value::Object(Default::default()));

        row.metadata = Some(serde_json::json!({"k": "v"}));
        assert_eq!(row.effective_metadata(), serde_json::json!({"k": "v"}));
    }

    #[test]
    fn effective_priority_defaults_zero() {
        let row = NewEvent {
            session_id: Uuid::new_v4(),
            source_job_id: None,
            event_type: "page.load".into(),
            event_data: Value::Null,
            metadata: None,
            storage_key: None,
            priority: None,
        };
        assert_eq!(row.effective_priority(), 0);
    }

    #[test]
    fn normalize_clamps_limit_and_offset() {
        let opts = EventListOptions {
            limit: 5000,
            offset: -10,
            ..EventListOptions::new()
        }
        .normalize()
        .unwrap();
        assert_eq!(opts.limit, 1000);
        assert_eq!(opts.offset, 0);
    }

    #[test]
    fn normalize_rejects_both_cursors_set() {
        let opts = EventListOptions {
            cursor_after: Some("a".into()),
            cursor_before: Some("b".into()),
            ..EventListOptions::new()
        };
        assert!(opts.normalize().is_err());
    }

    #[test]
    fn count_options_has_filters() {
        assert!(!EventCountOptions::default().has_filters());
        assert!(EventCountOptions {
            event_type: Some("x".into()),
            ..Default::default()
        }
        .has_filters());
    }
}
