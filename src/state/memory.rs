//! In-process store for tests and `memory://` development runs

use super::types::{NewPendingTransaction, PendingTransaction, TransactionStats, TransactionStatus};
use super::PendingStore;
use crate::error::{SnoozeError, SnoozeResult};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, PendingTransaction>,
    /// payload_hash -> id
    by_hash: HashMap<String, Uuid>,
    /// Insertion order, so listings are stable
    order: Vec<Uuid>,
}

/// Non-durable `PendingStore` guarded by a single lock
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self, filter: impl Fn(&PendingTransaction) -> bool) -> Vec<PendingTransaction> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|tx| filter(tx))
            .cloned()
            .collect()
    }
}

fn not_found(id: Uuid) -> SnoozeError {
    SnoozeError::NotFound(format!("Transaction {} not found", id))
}

#[async_trait]
impl PendingStore for InMemoryStore {
    async fn create(&self, new: NewPendingTransaction) -> SnoozeResult<PendingTransaction> {
        let mut inner = self.inner.write().await;
        if inner.by_hash.contains_key(&new.payload_hash) {
            return Err(SnoozeError::Duplicate {
                payload_hash: new.payload_hash,
            });
        }

        let record = new.into_record();
        inner.by_hash.insert(record.payload_hash.clone(), record.id);
        inner.order.push(record.id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> SnoozeResult<PendingTransaction> {
        self.inner
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list_unsent(&self) -> SnoozeResult<Vec<PendingTransaction>> {
        Ok(self.collect(|tx| !tx.is_sent()).await)
    }

    async fn list_all(&self) -> SnoozeResult<Vec<PendingTransaction>> {
        Ok(self.collect(|_| true).await)
    }

    async fn mark_sent(&self, id: Uuid, tx_hash: &str) -> SnoozeResult<PendingTransaction> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or_else(|| not_found(id))?;

        if record.status == TransactionStatus::Pending {
            record.status = TransactionStatus::Sent;
            record.tx_hash = Some(tx_hash.to_string());
            record.updated_at = Utc::now();
        }
        Ok(record.clone())
    }

    async fn mark_confirmed(&self, id: Uuid, success: bool) -> SnoozeResult<PendingTransaction> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or_else(|| not_found(id))?;

        let target = if success {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Failed
        };

        if record.status.is_terminal() {
            return Ok(record.clone());
        }
        if record.status == TransactionStatus::Pending {
            return Err(SnoozeError::InvalidStateTransition {
                from: record.status.to_string(),
                to: target.to_string(),
            });
        }

        record.status = target;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn stats(&self) -> SnoozeResult<TransactionStats> {
        let inner = self.inner.read().await;
        let mut stats = TransactionStats::default();
        for record in inner.records.values() {
            stats.add(record.status, 1);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> SnoozeResult<()> {
        Ok(())
    }
}
