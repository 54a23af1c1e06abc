//! Postgres implementation of the alert store: delivery status
//! writeback and idempotent resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobhold_core::{Alert, AlertFilter, AlertStore, AlertWithSiteName, NewAlert, StoreError};

use crate::bind_param;

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    site_id: Uuid,
    rule_id: Option<Uuid>,
    severity: String,
    message: String,
    delivery_status: String,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            site_id: row.site_id,
            rule_id: row.rule_id,
            severity: row.severity,
            message: row.message,
            delivery_status: row.delivery_status,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn create(&self, req: NewAlert) -> Result<Alert, StoreError> {
        if req.message.is_empty() {
            return Err(StoreError::invalid("message must not be empty"));
        }
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO alerts (id, site_id, rule_id, severity, message, delivery_status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.site_id)
        .bind(req.rule_id)
        .bind(&req.severity)
        .bind(&req.message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| jobhold_core::error::map_constraint_violation(e, "alert", || req.message.clone(), Some("site")))?;
        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Alert, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("alert", id.to_string()))?;
        Ok(row.into())
    }

    async fn update_delivery_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE alerts SET delivery_status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("alert", id.to_string()));
        }
        Ok(())
    }

    async fn resolve(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE alerts SET resolved_at = now() WHERE id = $1 AND resolved_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("alert", id.to_string()));
        }
        Ok(())
    }

    async fn list_with_site_names(
        &self,
        filter: AlertFilter,
    ) -> Result<Vec<AlertWithSiteName>, StoreError> {
        // The builder models single-table queries; this is the one join in
        // the crate, so its WHERE/ORDER/LIMIT fragment is hand-rolled here
        // rather than stretching `QueryBuilder` to cover joins for one caller.
        let mut clauses = Vec::new();
        let mut params: Vec<crate::query::Param> = Vec::new();
        if let Some(site_id) = filter.site_id {
            params.push(site_id.into());
            clauses.push(format!("a.site_id = ${}", params.len()));
        }
        if let Some(severity) = &filter.severity {
            params.push(severity.clone().into());
            clauses.push(format!("a.severity = ${}", params.len()));
        }
        if filter.unresolved_only {
            clauses.push("a.resolved_at IS NULL".to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let mut sql = format!(
            r#"
            SELECT a.id, a.site_id, a.rule_id, a.severity, a.message, a.delivery_status,
                   a.resolved_at, a.created_at, s.name AS site_name
            FROM alerts a JOIN sites s ON s.id = a.site_id
            {where_sql}
            ORDER BY a.created_at DESC
            "#
        );
        if filter.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", filter.limit));
        }
        if filter.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", filter.offset));
        }

        let mut query = sqlx::query_as::<_, AlertJoinRow>(&sql);
        for p in params {
            query = bind_param!(query, p);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| AlertWithSiteName {
                alert: Alert {
                    id: r.id,
                    site_id: r.site_id,
                    rule_id: r.rule_id,
                    severity: r.severity,
                    message: r.message,
                    delivery_status: r.delivery_status,
                    resolved_at: r.resolved_at,
                    created_at: r.created_at,
                },
                site_name: r.site_name,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct AlertJoinRow {
    id: Uuid,
    site_id: Uuid,
    rule_id: Option<Uuid>,
    severity: String,
    message: String,
    delivery_status: String,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    site_name: String,
}
