//! Postgres implementation of the secret store: values are encrypted
//! at rest with AES-256-GCM. Key management is out of scope — the
//! 32-byte key is an opaque constructor argument, typically sourced from the
//! deployment's own secret manager.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;
use zeroize::Zeroize;

use jobhold_core::{NewSecret, Secret, SecretStore, SecretSummary, StoreError};

/// Version tag prefixed to every ciphertext, so a future key-rotation or
/// cipher change can recognise and migrate old rows rather than guess.
const CIPHERTEXT_VERSION_V1: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(sqlx::FromRow)]
struct SecretSummaryRow {
    id: Uuid,
    name: String,
    refresh_enabled: bool,
    refresh_interval_secs: Option<i64>,
    last_refreshed_at: Option<DateTime<Utc>>,
    last_refresh_status: Option<String>,
    last_refresh_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SecretSummaryRow> for SecretSummary {
    fn from(row: SecretSummaryRow) -> Self {
        SecretSummary {
            id: row.id,
            name: row.name,
            refresh_enabled: row.refresh_enabled,
            refresh_interval: row.refresh_interval_secs.map(Duration::seconds),
            last_refreshed_at: row.last_refreshed_at,
            last_refresh_status: row.last_refresh_status,
            last_refresh_error: row.last_refresh_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SecretRow {
    id: Uuid,
    name: String,
    value_enc: Vec<u8>,
    refresh_enabled: bool,
    refresh_interval_secs: Option<i64>,
    last_refreshed_at: Option<DateTime<Utc>>,
    last_refresh_status: Option<String>,
    last_refresh_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SecretRow {
    fn into_summary(self) -> (SecretSummary, Vec<u8>) {
        let value_enc = self.value_enc;
        (
            SecretSummary {
                id: self.id,
                name: self.name,
                refresh_enabled: self.refresh_enabled,
                refresh_interval: self.refresh_interval_secs.map(Duration::seconds),
                last_refreshed_at: self.last_refreshed_at,
                last_refresh_status: self.last_refresh_status,
                last_refresh_error: self.last_refresh_error,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            value_enc,
        )
    }
}

#[derive(Clone)]
pub struct PgSecretStore {
    pool: PgPool,
    cipher: Aes256Gcm,
}

impl PgSecretStore {
    /// `key` must be exactly 32 bytes. Zeroized after deriving the cipher.
    pub fn new(pool: PgPool, mut key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        key.zeroize();
        Self { pool, cipher }
    }

    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| StoreError::invalid("failed to encrypt secret value"))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(CIPHERTEXT_VERSION_V1);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<String, StoreError> {
        if blob.len() < 1 + NONCE_LEN || blob[0] != CIPHERTEXT_VERSION_V1 {
            return Err(StoreError::invalid("unrecognised secret ciphertext version"));
        }
        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &blob[1 + NONCE_LEN..])
            .map_err(|_| StoreError::invalid("failed to decrypt secret value"))?;
        String::from_utf8(plaintext).map_err(|_| StoreError::invalid("decrypted secret was not valid utf-8"))
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn create(&self, req: NewSecret) -> Result<SecretSummary, StoreError> {
        if req.name.is_empty() {
            return Err(StoreError::invalid("name must not be empty"));
        }
        if req.value.is_empty() {
            return Err(StoreError::invalid("value must not be empty"));
        }
        let ciphertext = self.encrypt(&req.value)?;
        let refresh_interval_secs = req.refresh_interval.map(|d| d.num_seconds());

        let row = sqlx::query_as::<_, SecretSummaryRow>(
            r#"
            INSERT INTO secrets (
                id, name, value_enc, refresh_enabled, refresh_interval_secs, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING id, name, refresh_enabled, refresh_interval_secs,
                      last_refreshed_at, last_refresh_status, last_refresh_error,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&ciphertext)
        .bind(req.refresh_enabled)
        .bind(refresh_interval_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| jobhold_core::error::map_constraint_violation(e, "secret", || req.name.clone(), None))?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Secret, StoreError> {
        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            SELECT id, name, value_enc, refresh_enabled, refresh_interval_secs,
                   last_refreshed_at, last_refresh_status, last_refresh_error,
                   created_at, updated_at
            FROM secrets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("secret", id.to_string()))?;

        let (summary, value_enc) = row.into_summary();
        Ok(Secret {
            value: self.decrypt(&value_enc)?,
            summary,
        })
    }

    async fn get_by_name(&self, name: &str) -> Result<Secret, StoreError> {
        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            SELECT id, name, value_enc, refresh_enabled, refresh_interval_secs,
                   last_refreshed_at, last_refresh_status, last_refresh_error,
                   created_at, updated_at
            FROM secrets WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("secret", name.to_string()))?;

        let (summary, value_enc) = row.into_summary();
        Ok(Secret {
            value: self.decrypt(&value_enc)?,
            summary,
        })
    }

    async fn set_value(&self, id: Uuid, value: &str) -> Result<(), StoreError> {
        if value.is_empty() {
            return Err(StoreError::invalid("value must not be empty"));
        }
        let ciphertext = self.encrypt(value)?;
        let result = sqlx::query("UPDATE secrets SET value_enc = $1, updated_at = now() WHERE id = $2")
            .bind(&ciphertext)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("secret", id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("secret", id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SecretSummary>, StoreError> {
        let rows = sqlx::query_as::<_, SecretSummaryRow>(
            r#"
            SELECT id, name, refresh_enabled, refresh_interval_secs,
                   last_refreshed_at, last_refresh_status, last_refresh_error,
                   created_at, updated_at
            FROM secrets ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SecretSummary::from).collect())
    }

    async fn find_due_for_refresh(&self, limit: i64) -> Result<Vec<SecretSummary>, StoreError> {
        if limit <= 0 {
            return Err(StoreError::invalid("limit must be positive"));
        }
        let rows = sqlx::query_as::<_, SecretSummaryRow>(
            r#"
            SELECT id, name, refresh_enabled, refresh_interval_secs,
                   last_refreshed_at, last_refresh_status, last_refresh_error,
                   created_at, updated_at
            FROM secrets
            WHERE refresh_enabled
              AND (last_refreshed_at IS NULL
                   OR last_refreshed_at + make_interval(secs => refresh_interval_secs) <= now())
            ORDER BY last_refreshed_at ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SecretSummary::from).collect())
    }

    async fn record_refresh_result(
        &self,
        id: Uuid,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE secrets
            SET last_refreshed_at = now(), last_refresh_status = $1, last_refresh_error = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("secret", id.to_string()));
        }
        Ok(())
    }
}
