//! Keyset pagination cursor.
//!
//! A cursor is base64-encoded JSON carrying the sort key of the last row
//! seen, so paging never uses `OFFSET`. Decoding validates that the cursor's
//! sort field matches the query's requested sort field — a mismatch (or
//! malformed base64/JSON) is always an `InvalidArgument`, never a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    CreatedAt,
    EventType,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::CreatedAt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

impl Default for SortDir {
    fn default() -> Self {
        SortDir::Desc
    }
}

/// The decoded contents of a keyset cursor token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub sort_by: SortBy,
    pub sort_dir: SortDir,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    /// Encode as the opaque base64 token callers pass back as
    /// `cursor_after`/`cursor_before`.
    pub fn encode(&self) -> Result<String, StoreError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            json,
        ))
    }

    /// Decode a token, validating it was built for the same `sort_by` the
    /// caller is now querying with, and (for `EventType` sort) that it
    /// carries the `event_type` discriminator.
    pub fn decode(token: &str, expected_sort_by: SortBy) -> Result<Cursor, StoreError> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, token)
            .map_err(|e| StoreError::invalid(format!("invalid cursor encoding: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::invalid(format!("invalid cursor payload: {e}")))?;
        if cursor.sort_by != expected_sort_by {
            return Err(StoreError::invalid("cursor sort_by does not match query"));
        }
        if cursor.sort_by == SortBy::EventType && cursor.event_type.is_none() {
            return Err(StoreError::invalid(
                "cursor for event_type sort must carry event_type",
            ));
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64_json() {
        let cursor = Cursor {
            sort_by: SortBy::CreatedAt,
            sort_dir: SortDir::Desc,
            event_type: None,
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let token = cursor.encode().unwrap();
        let decoded = Cursor::decode(&token, SortBy::CreatedAt).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn rejects_mismatched_sort_by() {
        let cursor = Cursor {
            sort_by: SortBy::CreatedAt,
            sort_dir: SortDir::Desc,
            event_type: None,
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let token = cursor.encode().unwrap();
        assert!(Cursor::decode(&token, SortBy::EventType).is_err());
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(Cursor::decode("not-base64-json!!!", SortBy::CreatedAt).is_err());
    }

    #[test]
    fn event_type_sort_requires_event_type_field() {
        let cursor = Cursor {
            sort_by: SortBy::EventType,
            sort_dir: SortDir::Asc,
            event_type: None,
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let token = cursor.encode().unwrap();
        assert!(Cursor::decode(&token, SortBy::EventType).is_err());
    }
}
