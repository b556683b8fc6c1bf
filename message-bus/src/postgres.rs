//! PostgreSQL outbox store

use crate::outbox::{OutboxRecord, OutboxState, OutboxStore};
use crate::metrics::OUTBOX_TRANSITIONS_TOTAL;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_messages (
    id          UUID PRIMARY KEY,
    type        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL,
    retries     INTEGER NOT NULL DEFAULT 0,
    state       TEXT NOT NULL
)
"#;

/// Outbox store backed by the `outbox_messages` table (append/update only)
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Create new store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<OutboxRecord> {
    let state: String = row.try_get("state")?;
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        message_type: row.try_get("type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        retries: row.try_get("retries")?,
        state: state.parse()?,
    })
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, record: &OutboxRecord) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO outbox_messages \
             (id, type, payload, created_at, updated_at, retries, state) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.message_type)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.retries)
        .bind(record.state.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            OUTBOX_TRANSITIONS_TOTAL
                .with_label_values(&[record.state.as_str()])
                .inc();
        }
        Ok(inserted)
    }

    async fn transition(&self, id: Uuid, state: OutboxState) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::RecordNotFound(id))?;

        let mut record = record_from_row(&row)?;
        record.transition(state, Utc::now())?;

        sqlx::query("UPDATE outbox_messages SET state = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(record.state.as_str())
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        OUTBOX_TRANSITIONS_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
        Ok(())
    }

    async fn record_failed_retry(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET retries = retries + 1, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RecordNotFound(id));
        }
        Ok(())
    }

    async fn ready_to_retry(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_messages \
             WHERE state = $1 AND retries < $2 \
             ORDER BY created_at \
             LIMIT $3",
        )
        .bind(OutboxState::ReadyToRetry.as_str())
        .bind(max_retries)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}
