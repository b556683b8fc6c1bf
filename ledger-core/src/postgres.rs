//! PostgreSQL inbox store and settlement log

use crate::inbox::Admission;
use crate::storage::{InboxStore, SettlementLog};
use crate::types::{InboxRecord, InboxState, Processor, ProcessorSummary, SettlementResult, Summary};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: [&str; 2] = [
    r#"
CREATE TABLE IF NOT EXISTS inbox_messages (
    id                 UUID PRIMARY KEY,
    source_message_id  UUID NOT NULL UNIQUE,
    created_at         TIMESTAMPTZ NOT NULL,
    updated_at         TIMESTAMPTZ NOT NULL,
    retries            INTEGER NOT NULL DEFAULT 0,
    state              TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS payment_logs (
    id              UUID PRIMARY KEY,
    correlation_id  UUID NOT NULL UNIQUE,
    processor       TEXT NOT NULL,
    amount          NUMERIC NOT NULL,
    settled_at      TIMESTAMPTZ NOT NULL
)
"#,
];

/// Inbox and settlement log over PostgreSQL (append/update only)
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create new store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn inbox_from_row(row: &PgRow) -> Result<InboxRecord> {
    let state: String = row.try_get("state")?;
    Ok(InboxRecord {
        id: row.try_get("id")?,
        source_message_id: row.try_get("source_message_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        retries: row.try_get("retries")?,
        state: state.parse()?,
    })
}

const SELECT_FOR_UPDATE: &str =
    "SELECT * FROM inbox_messages WHERE source_message_id = $1 FOR UPDATE";

const UPDATE_RECORD: &str =
    "UPDATE inbox_messages SET retries = $2, state = $3, updated_at = $4 WHERE id = $1";

#[async_trait]
impl InboxStore for PgLedgerStore {
    async fn admit(&self, source_message_id: Uuid, max_retries: i32) -> Result<Admission> {
        let now = Utc::now();
        let fresh = InboxRecord::first_sighting(source_message_id, now);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO inbox_messages \
             (id, source_message_id, created_at, updated_at, retries, state) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (source_message_id) DO NOTHING",
        )
        .bind(fresh.id)
        .bind(fresh.source_message_id)
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .bind(fresh.retries)
        .bind(fresh.state.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            tx.commit().await?;
            return Ok(Admission::Process(fresh));
        }

        let row = sqlx::query(SELECT_FOR_UPDATE)
            .bind(source_message_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut record = inbox_from_row(&row)?;
        let readmission = record.readmit(max_retries, now);

        if readmission.is_change() {
            sqlx::query(UPDATE_RECORD)
                .bind(record.id)
                .bind(record.retries)
                .bind(record.state.as_str())
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(readmission.into_admission(&record))
    }

    async fn conclude(
        &self,
        source_message_id: Uuid,
        succeeded: bool,
        max_retries: i32,
    ) -> Result<InboxState> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(SELECT_FOR_UPDATE)
            .bind(source_message_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::RecordNotFound(source_message_id))?;
        let mut record = inbox_from_row(&row)?;
        let before = record.state;
        let state = record.conclude(succeeded, max_retries, Utc::now());

        if state != before {
            sqlx::query(UPDATE_RECORD)
                .bind(record.id)
                .bind(record.retries)
                .bind(state.as_str())
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(state)
    }

    async fn release(&self, source_message_id: Uuid) -> Result<InboxState> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(SELECT_FOR_UPDATE)
            .bind(source_message_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::RecordNotFound(source_message_id))?;
        let mut record = inbox_from_row(&row)?;

        if record.release(Utc::now()) {
            sqlx::query(UPDATE_RECORD)
                .bind(record.id)
                .bind(record.retries)
                .bind(record.state.as_str())
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(record.state)
    }

    async fn get(&self, source_message_id: Uuid) -> Result<Option<InboxRecord>> {
        let row = sqlx::query("SELECT * FROM inbox_messages WHERE source_message_id = $1")
            .bind(source_message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(inbox_from_row).transpose()
    }
}

#[async_trait]
impl SettlementLog for PgLedgerStore {
    async fn append(&self, result: &SettlementResult) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO payment_logs (id, correlation_id, processor, amount, settled_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (correlation_id) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(result.correlation_id)
        .bind(result.processor.as_str())
        .bind(result.amount)
        .bind(result.settled_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        debug!(correlation_id = %result.correlation_id, inserted, "Settlement logged");
        Ok(inserted)
    }

    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Summary> {
        let rows = sqlx::query(
            "SELECT processor, COUNT(*) AS total_requests, \
             COALESCE(SUM(amount), 0) AS total_amount \
             FROM payment_logs \
             WHERE ($1::timestamptz IS NULL OR settled_at >= $1) \
               AND ($2::timestamptz IS NULL OR settled_at <= $2) \
             GROUP BY processor",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = Summary::default();
        for row in rows {
            let processor: String = row.try_get("processor")?;
            let totals = ProcessorSummary {
                total_requests: row.try_get::<i64, _>("total_requests")? as u64,
                total_amount: row.try_get::<Decimal, _>("total_amount")?,
            };
            match processor.parse::<Processor>()? {
                Processor::Primary => summary.primary = totals,
                Processor::Secondary => summary.secondary = totals,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::SkipReason;
    use rust_decimal_macros::dec;

    async fn store() -> PgLedgerStore {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgLedgerStore::new(PgPool::connect(&url).await.unwrap());
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL (DATABASE_URL)
    async fn test_inbox_admission_is_idempotent() {
        let store = store().await;
        let id = Uuid::new_v4();

        assert!(matches!(store.admit(id, 3).await.unwrap(), Admission::Process(_)));
        assert_eq!(
            store.admit(id, 3).await.unwrap(),
            Admission::Skip(SkipReason::InFlight)
        );
        assert_eq!(
            store.conclude(id, false, 3).await.unwrap(),
            InboxState::ReadyToRetry
        );
        let readmitted = store.admit(id, 3).await.unwrap();
        assert!(matches!(readmitted, Admission::Process(r) if r.retries == 1));
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL (DATABASE_URL)
    async fn test_settlement_log_summary() {
        let store = store().await;
        let settled_at = Utc::now();
        let result = SettlementResult {
            correlation_id: Uuid::new_v4(),
            processor: Processor::Secondary,
            amount: dec!(12.34),
            settled_at,
        };

        assert!(store.append(&result).await.unwrap());
        assert!(!store.append(&result).await.unwrap());

        let summary = store.summary(Some(settled_at), Some(settled_at)).await.unwrap();
        assert!(summary.secondary.total_requests >= 1);
    }
}
