//! Postgres implementation of the domain allowlist: scoped entries
//! with a `global` fallback scope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobhold_core::{DomainAllowlistEntry, DomainAllowlistStore, NewDomainAllowlistEntry, StoreError};

#[derive(sqlx::FromRow)]
struct AllowlistRow {
    id: Uuid,
    scope: String,
    domain_pattern: String,
    priority: i32,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<AllowlistRow> for DomainAllowlistEntry {
    fn from(row: AllowlistRow) -> Self {
        DomainAllowlistEntry {
            id: row.id,
            scope: row.scope,
            domain_pattern: row.domain_pattern,
            priority: row.priority,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgDomainAllowlistStore {
    pool: PgPool,
}

impl PgDomainAllowlistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainAllowlistStore for PgDomainAllowlistStore {
    async fn create(
        &self,
        req: NewDomainAllowlistEntry,
    ) -> Result<DomainAllowlistEntry, StoreError> {
        if req.domain_pattern.is_empty() {
            return Err(StoreError::invalid("domain_pattern must not be empty"));
        }
        if req.scope.is_empty() {
            return Err(StoreError::invalid("scope must not be empty"));
        }
        let row = sqlx::query_as::<_, AllowlistRow>(
            r#"
            INSERT INTO domain_allowlist (id, scope, domain_pattern, priority, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.scope)
        .bind(&req.domain_pattern)
        .bind(req.priority)
        .bind(req.enabled)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM domain_allowlist WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("domain_allowlist", id.to_string()));
        }
        Ok(())
    }

    async fn get_for_scope(&self, scope: &str) -> Result<Vec<DomainAllowlistEntry>, StoreError> {
        let rows = sqlx::query_as::<_, AllowlistRow>(
            r#"
            SELECT * FROM domain_allowlist
            WHERE enabled AND (scope = $1 OR scope = 'global')
            ORDER BY priority ASC, created_at ASC
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DomainAllowlistEntry::from).collect())
    }
}
