//! PostgreSQL state manager

use super::types::{NewPendingTransaction, PendingTransaction, TransactionStats, TransactionStatus};
use super::PendingStore;
use crate::config::DatabaseConfig;
use crate::error::{SnoozeError, SnoozeResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str =
    "id, raw_payload, payload_hash, fee_threshold, status, tx_hash, created_at, updated_at";

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> SnoozeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the table if it does not exist yet
    pub async fn run_migrations(&self) -> SnoozeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_transactions (
                id UUID PRIMARY KEY,
                raw_payload TEXT NOT NULL,
                payload_hash VARCHAR(66) NOT NULL UNIQUE,
                fee_threshold BIGINT NOT NULL CHECK (fee_threshold > 0),
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                tx_hash VARCHAR(66),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pending_transactions_status
            ON pending_transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn fetch_optional(&self, id: Uuid) -> SnoozeResult<Option<PendingTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pending_transactions WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| from_row(&r)).transpose()
    }
}

fn from_row(row: &PgRow) -> SnoozeResult<PendingTransaction> {
    let status_str: String = row.get("status");
    let status = TransactionStatus::parse(&status_str).ok_or_else(|| {
        SnoozeError::Internal(format!("Unknown transaction status in database: {}", status_str))
    })?;

    Ok(PendingTransaction {
        id: row.get("id"),
        raw_payload: row.get("raw_payload"),
        payload_hash: row.get("payload_hash"),
        fee_threshold: row.get::<i64, _>("fee_threshold") as u64,
        status,
        tx_hash: row.get("tx_hash"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn not_found(id: Uuid) -> SnoozeError {
    SnoozeError::NotFound(format!("Transaction {} not found", id))
}

#[async_trait]
impl PendingStore for StateManager {
    async fn create(&self, new: NewPendingTransaction) -> SnoozeResult<PendingTransaction> {
        let record = new.into_record();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pending_transactions
                (id, raw_payload, payload_hash, fee_threshold, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (payload_hash) DO NOTHING
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(record.id)
        .bind(&record.raw_payload)
        .bind(&record.payload_hash)
        .bind(record.fee_threshold as i64)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!("Stored pending transaction {}", record.id);
                from_row(&row)
            }
            None => Err(SnoozeError::Duplicate {
                payload_hash: record.payload_hash,
            }),
        }
    }

    async fn get(&self, id: Uuid) -> SnoozeResult<PendingTransaction> {
        self.fetch_optional(id).await?.ok_or_else(|| not_found(id))
    }

    async fn list_unsent(&self) -> SnoozeResult<Vec<PendingTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pending_transactions WHERE status = 'pending' ORDER BY created_at",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(from_row).collect()
    }

    async fn list_all(&self) -> SnoozeResult<Vec<PendingTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pending_transactions ORDER BY created_at",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(from_row).collect()
    }

    async fn mark_sent(&self, id: Uuid, tx_hash: &str) -> SnoozeResult<PendingTransaction> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pending_transactions
            SET status = 'sent', tx_hash = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => from_row(&row),
            // Already past pending, or unknown
            None => self.get(id).await,
        }
    }

    async fn mark_confirmed(&self, id: Uuid, success: bool) -> SnoozeResult<PendingTransaction> {
        let target = if success {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Failed
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE pending_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'sent'
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(target.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return from_row(&row);
        }

        let current = self.get(id).await?;
        if current.status == TransactionStatus::Pending {
            return Err(SnoozeError::InvalidStateTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(current)
    }

    async fn stats(&self) -> SnoozeResult<TransactionStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM pending_transactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TransactionStats::default();
        for row in rows {
            let status: String = row.get("status");
            if let Some(status) = TransactionStatus::parse(&status) {
                stats.add(status, row.get::<i64, _>("count") as u64);
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> SnoozeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
