//! Postgres implementation of source CRUD with a named-secrets join table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use jobhold_core::error::map_constraint_violation;
use jobhold_core::{NewSource, Source, SourceStore, SourceUpdate, StoreError};

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    kind: String,
    config: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn secret_names(&self, source_id: Uuid) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT s.name FROM secrets s
            JOIN source_secrets ss ON ss.secret_id = s.id
            WHERE ss.source_id = $1
            ORDER BY s.name
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn replace_secrets(
        tx: &mut Transaction<'_, Postgres>,
        source_id: Uuid,
        names: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM source_secrets WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut **tx)
            .await?;
        for name in names {
            sqlx::query(
                r#"
                INSERT INTO source_secrets (source_id, secret_id)
                SELECT $1, id FROM secrets WHERE name = $2
                "#,
            )
            .bind(source_id)
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_constraint_violation(e, "secret", || name.clone(), Some("secret")))?;
        }
        Ok(())
    }

    async fn hydrate(&self, row: SourceRow) -> Result<Source, StoreError> {
        let secret_names = self.secret_names(row.id).await?;
        Ok(Source {
            id: row.id,
            name: row.name,
            kind: row.kind,
            config: row.config,
            secret_names,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn create(&self, req: NewSource) -> Result<Source, StoreError> {
        if req.name.is_empty() {
            return Err(StoreError::invalid("name must not be empty"));
        }
        if req.kind.is_empty() {
            return Err(StoreError::invalid("kind must not be empty"));
        }

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            INSERT INTO sources (id, name, kind, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            RETURNING id, name, kind, config, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.kind)
        .bind(&req.config)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_violation(e, "source", || req.name.clone(), None))?;

        Self::replace_secrets(&mut tx, row.id, &req.secrets).await?;
        tx.commit().await?;

        self.hydrate(row).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Source, StoreError> {
        let row = sqlx::query_as::<_, SourceRow>(
            "SELECT id, name, kind, config, created_at, updated_at FROM sources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("source", id.to_string()))?;
        self.hydrate(row).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Source, StoreError> {
        let row = sqlx::query_as::<_, SourceRow>(
            "SELECT id, name, kind, config, created_at, updated_at FROM sources WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("source", name.to_string()))?;
        self.hydrate(row).await
    }

    async fn update(&self, id: Uuid, update: SourceUpdate) -> Result<Source, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, SourceRow>(
            "SELECT id, name, kind, config, created_at, updated_at FROM sources WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("source", id.to_string()))?;

        let name = update.name.unwrap_or(current.name);
        let kind = update.kind.unwrap_or(current.kind);
        let config = update.config.unwrap_or(current.config);

        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            UPDATE sources SET name = $1, kind = $2, config = $3, updated_at = now()
            WHERE id = $4
            RETURNING id, name, kind, config, created_at, updated_at
            "#,
        )
        .bind(&name)
        .bind(&kind)
        .bind(&config)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_violation(e, "source", || name.clone(), None))?;

        if let Some(names) = update.secrets {
            Self::replace_secrets(&mut tx, id, &names).await?;
        }

        tx.commit().await?;
        self.hydrate(row).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("source", id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Source>, StoreError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            "SELECT id, name, kind, config, created_at, updated_at FROM sources ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            sources.push(self.hydrate(row).await?);
        }
        Ok(sources)
    }
}
