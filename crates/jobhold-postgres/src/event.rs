//! Postgres implementation of event ingest and keyset-paginated retrieval.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use jobhold_core::{
    Cursor, Event, EventCategory, EventCountOptions, EventListOptions, EventPage, EventStore,
    NewEvent, SortBy, SortDir, StoreError,
};

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    session_id: Uuid,
    source_job_id: Option<Uuid>,
    event_type: String,
    event_data: Value,
    metadata: Value,
    storage_key: Option<String>,
    priority: i16,
    should_process: bool,
    processed: bool,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            session_id: row.session_id,
            source_job_id: row.source_job_id,
            event_type: row.event_type,
            event_data: row.event_data,
            metadata: row.metadata,
            storage_key: row.storage_key,
            priority: row.priority,
            should_process: row.should_process,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

/// The `event_type` pattern each fixed category filters on.
fn category_pattern(category: EventCategory) -> (&'static str, bool) {
    match category {
        EventCategory::Network => ("network.%", true),
        EventCategory::Console => ("console.%", true),
        EventCategory::Security => ("security.%", true),
        EventCategory::Page => ("page.%", true),
        EventCategory::Action => ("action.%", true),
        EventCategory::Error => ("error", false),
        EventCategory::Screenshot => ("screenshot", false),
        EventCategory::WorkerLog => ("worker_log.%", true),
        EventCategory::JobFailure => ("job_failure", false),
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts `job_meta(job_id, event_count += k, updated_at = now)` for the
    /// one `source_job_id` a bulk-insert batch targets, inside the caller's
    /// transaction — this atomicity is what lets `count_by_job` serve from
    /// `job_meta` instead of scanning `events`.
    async fn bump_job_meta(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        count: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_meta (job_id, event_count, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO UPDATE
            SET event_count = job_meta.event_count + excluded.event_count, updated_at = excluded.updated_at
            "#,
        )
        .bind(job_id)
        .bind(count)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Per-`source_job_id` insert counts, so `bump_job_meta` runs once per
    /// distinct job rather than once per row.
    fn counts_by_job(rows: &[NewEvent]) -> HashMap<Uuid, i64> {
        let mut counts = HashMap::new();
        for row in rows {
            if let Some(job_id) = row.source_job_id {
                *counts.entry(job_id).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn bulk_insert(&self, rows: Vec<NewEvent>, should_process: bool) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = rows.iter().map(|_| Uuid::new_v4()).collect();
        let session_ids: Vec<Uuid> = rows.iter().map(|r| r.session_id).collect();
        let source_job_ids: Vec<Option<Uuid>> = rows.iter().map(|r| r.source_job_id).collect();
        let event_types: Vec<String> = rows.iter().map(|r| r.event_type.clone()).collect();
        let event_data: Vec<Value> = rows.iter().map(|r| r.event_data.clone()).collect();
        let metadata: Vec<Value> = rows.iter().map(|r| r.effective_metadata()).collect();
        let storage_keys: Vec<Option<String>> = rows.iter().map(|r| r.storage_key.clone()).collect();
        let priorities: Vec<i16> = rows.iter().map(|r| r.effective_priority()).collect();
        let should_process_flags: Vec<bool> = rows.iter().map(|_| should_process).collect();
        let created_ats: Vec<DateTime<Utc>> = rows.iter().map(|_| now).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, session_id, source_job_id, event_type, event_data, metadata,
                storage_key, priority, should_process, processed, created_at
            )
            SELECT *, false, created_at FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::jsonb[], $6::jsonb[],
                $7::text[], $8::smallint[], $9::boolean[], $10::timestamptz[]
            ) AS t(id, session_id, source_job_id, event_type, event_data, metadata, storage_key, priority, should_process, created_at)
            "#,
        )
        .bind(ids)
        .bind(session_ids)
        .bind(source_job_ids)
        .bind(event_types)
        .bind(event_data)
        .bind(metadata)
        .bind(storage_keys)
        .bind(priorities)
        .bind(should_process_flags)
        .bind(created_ats)
        .execute(&mut *tx)
        .await?;

        for (job_id, count) in Self::counts_by_job(&rows) {
            Self::bump_job_meta(&mut tx, job_id, count, now).await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn bulk_insert_copy(&self, rows: Vec<NewEvent>, should_process: bool) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        {
            let mut copy = tx
                .copy_in_raw(
                    "COPY events (id, session_id, source_job_id, event_type, event_data, metadata, storage_key, priority, should_process, processed, created_at) FROM STDIN WITH (FORMAT csv)",
                )
                .await?;
            let mut buf = String::new();
            for row in &rows {
                let id = Uuid::new_v4();
                buf.push_str(&csv_row(&[
                    id.to_string(),
                    row.session_id.to_string(),
                    row.source_job_id.map(|v| v.to_string()).unwrap_or_default(),
                    row.event_type.clone(),
                    row.event_data.to_string(),
                    row.effective_metadata().to_string(),
                    row.storage_key.clone().unwrap_or_default(),
                    row.effective_priority().to_string(),
                    should_process.to_string(),
                    false.to_string(),
                    now.to_rfc3339(),
                ]));
            }
            copy.send(buf.as_bytes()).await?;
            copy.finish().await?;
        }

        for (job_id, count) in Self::counts_by_job(&rows) {
            Self::bump_job_meta(&mut tx, job_id, count, now).await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn bulk_insert_with_processing_flags(
        &self,
        rows: Vec<NewEvent>,
        should_process: HashMap<usize, bool>,
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for (idx, row) in rows.iter().enumerate() {
            let flag = should_process.get(&idx).copied().unwrap_or(false);
            sqlx::query(
                r#"
                INSERT INTO events (
                    id, session_id, source_job_id, event_type, event_data, metadata,
                    storage_key, priority, should_process, processed, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.session_id)
            .bind(row.source_job_id)
            .bind(&row.event_type)
            .bind(&row.event_data)
            .bind(row.effective_metadata())
            .bind(&row.storage_key)
            .bind(row.effective_priority())
            .bind(flag)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        for (job_id, count) in Self::counts_by_job(&rows) {
            Self::bump_job_meta(&mut tx, job_id, count, now).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_by_job(&self, opts: EventListOptions) -> Result<EventPage, StoreError> {
        let opts = opts.normalize()?;
        if opts.is_keyset() {
            list_keyset(&self.pool, opts).await
        } else {
            list_offset(&self.pool, opts).await
        }
    }

    async fn count_by_job(&self, opts: EventCountOptions) -> Result<i64, StoreError> {
        if !opts.has_filters() {
            if let Some(job_id) = opts.source_job_id {
                let count: Option<i64> =
                    sqlx::query_scalar("SELECT event_count FROM job_meta WHERE job_id = $1")
                        .bind(job_id)
                        .fetch_optional(&self.pool)
                        .await?;
                return Ok(count.unwrap_or(0));
            }
        }

        let (where_sql, params) = build_filter(
            opts.source_job_id,
            opts.event_type.as_deref(),
            opts.category,
            opts.search.as_deref(),
        );
        let sql = format!("SELECT COUNT(*) FROM events {where_sql}");
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    async fn mark_processed_by_ids(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE events SET processed = true WHERE id = ANY($1) AND processed = false")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM events WHERE id = ANY($1) ORDER BY created_at ASC, id ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Builds the shared WHERE-clause text and bind-value list for the offset
/// path and CountByJob. Text values only — the query-builder's typed
/// `Condition` abstraction (see `query.rs`) is used by the adjacent CRUD
/// stores, which have more varied column types; event filtering's filters
/// are all text/uuid-as-text so a lighter hand-rolled builder suffices here.
fn build_filter(
    source_job_id: Option<Uuid>,
    event_type: Option<&str>,
    category: Option<EventCategory>,
    search: Option<&str>,
) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(job_id) = source_job_id {
        params.push(job_id.to_string());
        clauses.push(format!("source_job_id = ${}::uuid", params.len()));
    }
    if let Some(event_type) = event_type {
        params.push(event_type.to_string());
        clauses.push(format!("event_type = ${}", params.len()));
    }
    if let Some(category) = category {
        let (pattern, is_prefix) = category_pattern(category);
        params.push(pattern.to_string());
        if is_prefix {
            clauses.push(format!("event_type LIKE ${}", params.len()));
        } else {
            clauses.push(format!("event_type = ${}", params.len()));
        }
    }
    if let Some(search) = search {
        params.push(format!("%{search}%"));
        clauses.push(format!("event_data::text ILIKE ${}", params.len()));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

async fn list_offset(pool: &PgPool, opts: EventListOptions) -> Result<EventPage, StoreError> {
    let (where_sql, params) = build_filter(
        opts.source_job_id,
        opts.event_type.as_deref(),
        opts.category,
        opts.search.as_deref(),
    );

    let sort_col = match opts.sort_by {
        SortBy::CreatedAt => "created_at",
        SortBy::EventType => "event_type",
    };
    let dir = match opts.sort_dir {
        SortDir::Asc => "ASC",
        SortDir::Desc => "DESC",
    };

    let next_param = params.len() + 1;
    let sql = format!(
        "SELECT * FROM events {where_sql} ORDER BY {sort_col} {dir}, id {dir} LIMIT ${} OFFSET ${}",
        next_param,
        next_param + 1
    );

    let mut query = sqlx::query_as::<_, EventRow>(&sql);
    for param in &params {
        query = query.bind(param);
    }
    query = query.bind(opts.limit).bind(opts.offset);
    let rows = query.fetch_all(pool).await?;

    let total_sql = format!("SELECT COUNT(*) FROM events {where_sql}");
    let mut total_query = sqlx::query_scalar::<_, i64>(&total_sql);
    for param in &params {
        total_query = total_query.bind(param);
    }
    let total = total_query.fetch_one(pool).await?;

    let events: Vec<Event> = rows.into_iter().map(Event::from).collect();

    // An offset-paged request still hands back a keyset cursor when there's
    // more to see, so a caller can switch onto the cursor path for
    // subsequent pages instead of recomputing OFFSET against a moving table.
    let next_cursor = if opts.offset + (events.len() as i64) < total {
        events.last().map(|e| encode_cursor(e, &opts)).transpose()?
    } else {
        None
    };
    let prev_cursor = if opts.offset > 0 {
        events.first().map(|e| encode_cursor(e, &opts)).transpose()?
    } else {
        None
    };

    Ok(EventPage {
        events,
        next_cursor,
        prev_cursor,
        total: Some(total),
    })
}

async fn list_keyset(pool: &PgPool, opts: EventListOptions) -> Result<EventPage, StoreError> {
    let seeking_back = opts.cursor_before.is_some();
    let token = opts.cursor_after.as_deref().or(opts.cursor_before.as_deref()).unwrap();
    let cursor = Cursor::decode(token, opts.sort_by)?;

    let (where_sql, mut params) = build_filter(
        opts.source_job_id,
        opts.event_type.as_deref(),
        opts.category,
        opts.search.as_deref(),
    );

    let sort_col = match opts.sort_by {
        SortBy::CreatedAt => "created_at",
        SortBy::EventType => "event_type",
    };

    // Seeking forward in a DESC-sorted list means "less than" the cursor;
    // seeking backward inverts both the comparator and the in-query sort
    // order, then the result is reversed to restore user-visible order.
    let forward_is_lt = opts.sort_dir == SortDir::Desc;
    let want_lt = if seeking_back { !forward_is_lt } else { forward_is_lt };
    let query_dir = if seeking_back {
        match opts.sort_dir {
            SortDir::Asc => "DESC",
            SortDir::Desc => "ASC",
        }
    } else {
        match opts.sort_dir {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    };

    let cmp = if want_lt { "<" } else { ">" };
    let cursor_clause = match opts.sort_by {
        SortBy::CreatedAt => {
            params.push(cursor.created_at.to_rfc3339());
            params.push(cursor.id.to_string());
            format!(
                "(created_at, id) {cmp} (${}::timestamptz, ${}::uuid)",
                params.len() - 1,
                params.len()
            )
        }
        SortBy::EventType => {
            params.push(cursor.event_type.clone().unwrap_or_default());
            params.push(cursor.id.to_string());
            format!(
                "(event_type, id) {cmp} (${}, ${}::uuid)",
                params.len() - 1,
                params.len()
            )
        }
    };

    let full_where = if where_sql.is_empty() {
        format!("WHERE {cursor_clause}")
    } else {
        format!("{where_sql} AND {cursor_clause}")
    };

    let fetch_limit = opts.limit + 1;
    let limit_idx = params.len() + 1;
    let sql = format!(
        "SELECT * FROM events {full_where} ORDER BY {sort_col} {query_dir}, id {query_dir} LIMIT ${limit_idx}"
    );

    let mut query = sqlx::query_as::<_, EventRow>(&sql);
    for param in &params {
        query = query.bind(param);
    }
    query = query.bind(fetch_limit);
    let mut rows = query.fetch_all(pool).await?;

    let has_more = rows.len() as i64 > opts.limit;
    if has_more {
        rows.truncate(opts.limit as usize);
    }
    if seeking_back {
        rows.reverse();
    }

    let events: Vec<Event> = rows.into_iter().map(Event::from).collect();

    let next_cursor = if !seeking_back {
        if has_more {
            events.last().map(|e| encode_cursor(e, &opts))
        } else {
            None
        }
    } else {
        events.last().map(|e| encode_cursor(e, &opts))
    }
    .transpose()?;

    let prev_cursor = if seeking_back {
        if has_more {
            events.first().map(|e| encode_cursor(e, &opts))
        } else {
            None
        }
    } else {
        events.first().map(|e| encode_cursor(e, &opts))
    }
    .transpose()?;

    Ok(EventPage {
        events,
        next_cursor,
        prev_cursor,
        total: None,
    })
}

fn encode_cursor(event: &Event, opts: &EventListOptions) -> Result<String, StoreError> {
    Cursor {
        sort_by: opts.sort_by,
        sort_dir: opts.sort_dir,
        event_type: match opts.sort_by {
            SortBy::EventType => Some(event.event_type.clone()),
            SortBy::CreatedAt => None,
        },
        created_at: event.created_at,
        id: event.id,
    }
    .encode()
}
