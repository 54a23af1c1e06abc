//! Postgres implementation of site CRUD.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobhold_core::error::map_constraint_violation;
use jobhold_core::{NewSite, Site, SiteFilter, SiteStore, SiteUpdate, StoreError};

use crate::bind_param;
use crate::query::{Condition, OrderDir, QueryBuilder};

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    name: String,
    source_id: Option<Uuid>,
    url: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Site {
            id: row.id,
            name: row.name,
            source_id: row.source_id,
            url: row.url,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgSiteStore {
    pool: PgPool,
}

impl PgSiteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteStore for PgSiteStore {
    async fn create(&self, req: NewSite) -> Result<Site, StoreError> {
        if req.name.is_empty() {
            return Err(StoreError::invalid("name must not be empty"));
        }
        if req.url.is_empty() {
            return Err(StoreError::invalid("url must not be empty"));
        }

        let row = sqlx::query_as::<_, SiteRow>(
            r#"
            INSERT INTO sites (id, name, source_id, url, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(req.source_id)
        .bind(&req.url)
        .bind(req.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint_violation(e, "site", || req.name.clone(), Some("source")))?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Site, StoreError> {
        let row = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("site", id.to_string()))?;
        Ok(row.into())
    }

    async fn get_by_name(&self, name: &str) -> Result<Site, StoreError> {
        let row = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("site", name.to_string()))?;
        Ok(row.into())
    }

    async fn update(&self, id: Uuid, update: SiteUpdate) -> Result<Site, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("site", id.to_string()))?;

        let name = update.name.unwrap_or(current.name);
        let source_id = update.source_id.unwrap_or(current.source_id);
        let url = update.url.unwrap_or(current.url);
        let is_active = update.is_active.unwrap_or(current.is_active);

        let row = sqlx::query_as::<_, SiteRow>(
            r#"
            UPDATE sites SET name = $1, source_id = $2, url = $3, is_active = $4, updated_at = now()
            WHERE id = $5
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(source_id)
        .bind(&url)
        .bind(is_active)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_violation(e, "site", || name.clone(), Some("source")))?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("site", id.to_string()));
        }
        Ok(())
    }

    async fn list_with_filters(&self, filter: SiteFilter) -> Result<Vec<Site>, StoreError> {
        let mut qb = QueryBuilder::new("sites")
            .filter_opt(filter.source_id.map(|v| Condition::Equal("source_id".into(), v.into())))
            .filter_opt(filter.is_active.map(|v| Condition::Equal("is_active".into(), v.into())))
            .filter_opt(
                filter
                    .name_search
                    .map(|v| Condition::ILike("name".into(), format!("%{v}%"))),
            )
            .order_by("created_at", OrderDir::Desc);

        if filter.limit > 0 {
            qb = qb.limit(filter.limit);
        }
        if filter.offset > 0 {
            qb = qb.offset(filter.offset);
        }

        let (sql, params) = qb.build();
        let mut query = sqlx::query_as::<_, SiteRow>(&sql);
        for p in params {
            query = bind_param!(query, p);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Site::from).collect())
    }
}
