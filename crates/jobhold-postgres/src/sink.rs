//! Postgres implementation of the HTTP alert sink registry with a
//! named-secrets join table.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use jobhold_core::error::map_constraint_violation;
use jobhold_core::{HttpAlertSink, HttpAlertSinkStore, HttpAlertSinkUpdate, NewHttpAlertSink, StoreError};

#[derive(sqlx::FromRow)]
struct SinkRow {
    id: Uuid,
    name: String,
    url: String,
    headers: Value,
    enabled: bool,
}

#[derive(Clone)]
pub struct PgHttpAlertSinkStore {
    pool: PgPool,
}

impl PgHttpAlertSinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn secret_names(&self, sink_id: Uuid) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT s.name FROM secrets s
            JOIN sink_secrets ss ON ss.secret_id = s.id
            WHERE ss.sink_id = $1
            ORDER BY s.name
            "#,
        )
        .bind(sink_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn replace_secrets(
        tx: &mut Transaction<'_, Postgres>,
        sink_id: Uuid,
        names: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sink_secrets WHERE sink_id = $1")
            .bind(sink_id)
            .execute(&mut **tx)
            .await?;
        for name in names {
            sqlx::query(
                r#"
                INSERT INTO sink_secrets (sink_id, secret_id)
                SELECT $1, id FROM secrets WHERE name = $2
                "#,
            )
            .bind(sink_id)
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_constraint_violation(e, "secret", || name.clone(), Some("secret")))?;
        }
        Ok(())
    }

    async fn hydrate(&self, row: SinkRow) -> Result<HttpAlertSink, StoreError> {
        let secret_names = self.secret_names(row.id).await?;
        Ok(HttpAlertSink {
            id: row.id,
            name: row.name,
            url: row.url,
            headers: row.headers,
            enabled: row.enabled,
            secret_names,
        })
    }
}

#[async_trait]
impl HttpAlertSinkStore for PgHttpAlertSinkStore {
    async fn create(&self, req: NewHttpAlertSink) -> Result<HttpAlertSink, StoreError> {
        if req.name.is_empty() {
            return Err(StoreError::invalid("name must not be empty"));
        }
        if req.url.is_empty() {
            return Err(StoreError::invalid("url must not be empty"));
        }

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, SinkRow>(
            r#"
            INSERT INTO http_alert_sinks (id, name, url, headers, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, url, headers, enabled
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.url)
        .bind(&req.headers)
        .bind(req.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_violation(e, "http_alert_sink", || req.name.clone(), None))?;

        Self::replace_secrets(&mut tx, row.id, &req.secrets).await?;
        tx.commit().await?;

        self.hydrate(row).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<HttpAlertSink, StoreError> {
        let row = sqlx::query_as::<_, SinkRow>(
            "SELECT id, name, url, headers, enabled FROM http_alert_sinks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("http_alert_sink", id.to_string()))?;
        self.hydrate(row).await
    }

    async fn get_by_name(&self, name: &str) -> Result<HttpAlertSink, StoreError> {
        let row = sqlx::query_as::<_, SinkRow>(
            "SELECT id, name, url, headers, enabled FROM http_alert_sinks WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("http_alert_sink", name.to_string()))?;
        self.hydrate(row).await
    }

    async fn update(
        &self,
        id: Uuid,
        update: HttpAlertSinkUpdate,
    ) -> Result<HttpAlertSink, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, SinkRow>(
            "SELECT id, name, url, headers, enabled FROM http_alert_sinks WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("http_alert_sink", id.to_string()))?;

        let name = update.name.unwrap_or(current.name);
        let url = update.url.unwrap_or(current.url);
        let headers = update.headers.unwrap_or(current.headers);
        let enabled = update.enabled.unwrap_or(current.enabled);

        let row = sqlx::query_as::<_, SinkRow>(
            r#"
            UPDATE http_alert_sinks SET name = $1, url = $2, headers = $3, enabled = $4
            WHERE id = $5
            RETURNING id, name, url, headers, enabled
            "#,
        )
        .bind(&name)
        .bind(&url)
        .bind(&headers)
        .bind(enabled)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_violation(e, "http_alert_sink", || name.clone(), None))?;

        if let Some(names) = update.secrets {
            Self::replace_secrets(&mut tx, id, &names).await?;
        }

        tx.commit().await?;
        self.hydrate(row).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM http_alert_sinks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("http_alert_sink", id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<HttpAlertSink>, StoreError> {
        let rows = sqlx::query_as::<_, SinkRow>(
            "SELECT id, name, url, headers, enabled FROM http_alert_sinks ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sinks = Vec::with_capacity(rows.len());
        for row in rows {
            sinks.push(self.hydrate(row).await?);
        }
        Ok(sinks)
    }
}
