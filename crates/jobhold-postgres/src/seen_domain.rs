//! Postgres implementation of seen-domain tracking: upsert by
//! `(site_id, domain, scope)` with a hit counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobhold_core::{SeenDomain, SeenDomainStore, StoreError};

#[derive(sqlx::FromRow)]
struct SeenDomainRow {
    site_id: Uuid,
    domain: String,
    scope: String,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    hit_count: i64,
}

impl From<SeenDomainRow> for SeenDomain {
    fn from(row: SeenDomainRow) -> Self {
        SeenDomain {
            site_id: row.site_id,
            domain: row.domain,
            scope: row.scope,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
            hit_count: row.hit_count,
        }
    }
}

#[derive(Clone)]
pub struct PgSeenDomainStore {
    pool: PgPool,
}

impl PgSeenDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeenDomainStore for PgSeenDomainStore {
    async fn record_seen(
        &self,
        site_id: Uuid,
        domain: &str,
        scope: &str,
    ) -> Result<SeenDomain, StoreError> {
        if domain.is_empty() {
            return Err(StoreError::invalid("domain must not be empty"));
        }
        let row = sqlx::query_as::<_, SeenDomainRow>(
            r#"
            INSERT INTO seen_domains (site_id, domain, scope, first_seen_at, last_seen_at, hit_count)
            VALUES ($1, $2, $3, now(), now(), 1)
            ON CONFLICT (site_id, domain, scope) DO UPDATE
            SET last_seen_at = now(), hit_count = seen_domains.hit_count + 1
            RETURNING *
            "#,
        )
        .bind(site_id)
        .bind(domain)
        .bind(scope)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get(&self, site_id: Uuid, domain: &str, scope: &str) -> Result<SeenDomain, StoreError> {
        let row = sqlx::query_as::<_, SeenDomainRow>(
            "SELECT * FROM seen_domains WHERE site_id = $1 AND domain = $2 AND scope = $3",
        )
        .bind(site_id)
        .bind(domain)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("seen_domain", format!("{site_id}/{domain}/{scope}")))?;
        Ok(row.into())
    }

    async fn list_for_site(&self, site_id: Uuid) -> Result<Vec<SeenDomain>, StoreError> {
        let rows = sqlx::query_as::<_, SeenDomainRow>(
            "SELECT * FROM seen_domains WHERE site_id = $1 ORDER BY last_seen_at DESC",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SeenDomain::from).collect())
    }
}
