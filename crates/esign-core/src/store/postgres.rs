use super::{EnvelopeFilter, EnvelopeStore, StoreResult};
use crate::error::EnvelopeError;
use crate::types::{Envelope, EnvelopeId};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// PostgreSQL store: one JSONB document per envelope plus a token lookup table.
#[derive(Debug, Clone)]
pub struct PostgresEnvelopeStore {
    pool: PgPool,
}

fn storage_err(context: &str) -> impl FnOnce(sqlx::Error) -> EnvelopeError + '_ {
    move |e| EnvelopeError::Storage(format!("postgres {context} failed: {e}"))
}

fn to_i64(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| EnvelopeError::Storage(format!("{what} exceeds postgres BIGINT range")))
}

impl PostgresEnvelopeStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(storage_err("connect"))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS esign_envelopes (
                id UUID PRIMARY KEY,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                archived BOOLEAN NOT NULL DEFAULT FALSE,
                revision BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("schema create"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS esign_signer_tokens (
                token TEXT PRIMARY KEY,
                envelope_id UUID NOT NULL REFERENCES esign_envelopes (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("schema create"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_esign_envelopes_owner ON esign_envelopes (owner_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("index create"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_esign_signer_tokens_envelope ON esign_signer_tokens (envelope_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("index create"))?;

        Ok(())
    }

    async fn write_tokens(
        tx: &mut Transaction<'_, Postgres>,
        envelope: &Envelope,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM esign_signer_tokens WHERE envelope_id = $1")
            .bind(envelope.id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(storage_err("token delete"))?;

        for token in envelope.tokens() {
            sqlx::query("INSERT INTO esign_signer_tokens (token, envelope_id) VALUES ($1, $2)")
                .bind(token)
                .bind(envelope.id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(storage_err("token insert"))?;
        }
        Ok(())
    }
}

fn decode_document(row: &sqlx::postgres::PgRow) -> StoreResult<Envelope> {
    let document: Value = row
        .try_get("document")
        .map_err(storage_err("decode document"))?;
    // the audit log refuses to deserialize when its hash chain is broken
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl EnvelopeStore for PostgresEnvelopeStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, envelope: &Envelope) -> StoreResult<()> {
        let document = serde_json::to_value(envelope)?;
        let mut tx = self.pool.begin().await.map_err(storage_err("begin"))?;

        sqlx::query(
            r#"
            INSERT INTO esign_envelopes (
                id, owner_id, status, archived, revision, created_at, updated_at, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(envelope.id.as_uuid())
        .bind(&envelope.owner_id)
        .bind(envelope.status().to_string())
        .bind(envelope.is_archived())
        .bind(to_i64(envelope.revision(), "revision")?)
        .bind(envelope.created_at)
        .bind(envelope.updated_at())
        .bind(&document)
        .execute(&mut *tx)
        .await
        .map_err(storage_err("insert"))?;

        Self::write_tokens(&mut tx, envelope).await?;
        tx.commit().await.map_err(storage_err("commit"))?;
        Ok(())
    }

    async fn get(&self, id: &EnvelopeId) -> StoreResult<Option<Envelope>> {
        let row = sqlx::query("SELECT document FROM esign_envelopes WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("load"))?;
        row.as_ref().map(decode_document).transpose()
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Envelope>> {
        let row = sqlx::query(
            r#"
            SELECT e.document
            FROM esign_signer_tokens t
            JOIN esign_envelopes e ON e.id = t.envelope_id
            WHERE t.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err("token lookup"))?;
        row.as_ref().map(decode_document).transpose()
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &EnvelopeFilter,
    ) -> StoreResult<(Vec<Envelope>, usize)> {
        let status = filter.status.map(|s| s.to_string());
        let limit = to_i64(filter.limit as u64, "limit")?;
        let offset = to_i64(filter.offset as u64, "offset")?;

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM esign_envelopes
            WHERE owner_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::BOOLEAN IS NULL OR archived = $3)
            "#,
        )
        .bind(owner_id)
        .bind(&status)
        .bind(filter.archived)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err("count"))?
        .try_get("total")
        .map_err(storage_err("decode total"))?;

        let rows = sqlx::query(
            r#"
            SELECT document FROM esign_envelopes
            WHERE owner_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::BOOLEAN IS NULL OR archived = $3)
            ORDER BY created_at DESC, id ASC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(owner_id)
        .bind(&status)
        .bind(filter.archived)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("list"))?;

        let envelopes = rows
            .iter()
            .map(decode_document)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((envelopes, usize::try_from(total).unwrap_or_default()))
    }

    async fn replace(&self, envelope: &Envelope, expected_revision: u64) -> StoreResult<bool> {
        let document = serde_json::to_value(envelope)?;
        let mut tx = self.pool.begin().await.map_err(storage_err("begin"))?;

        let updated = sqlx::query(
            r#"
            UPDATE esign_envelopes
            SET status = $3, archived = $4, revision = $5, updated_at = $6, document = $7
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(envelope.id.as_uuid())
        .bind(to_i64(expected_revision, "revision")?)
        .bind(envelope.status().to_string())
        .bind(envelope.is_archived())
        .bind(to_i64(envelope.revision(), "revision")?)
        .bind(envelope.updated_at())
        .bind(&document)
        .execute(&mut *tx)
        .await
        .map_err(storage_err("conditional update"))?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.map_err(storage_err("rollback"))?;
            return Ok(false);
        }

        Self::write_tokens(&mut tx, envelope).await?;
        tx.commit().await.map_err(storage_err("commit"))?;
        Ok(true)
    }

    async fn delete_archived(&self, id: &EnvelopeId, owner_id: &str) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM esign_envelopes WHERE id = $1 AND owner_id = $2 AND archived",
        )
        .bind(id.as_uuid())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("delete"))?
        .rows_affected();
        Ok(deleted > 0)
    }
}
