//! Pending transaction persistence
//!
//! Handles:
//! - Registration with payload deduplication
//! - Listing unsent / all records
//! - Compare-and-set lifecycle updates (sent, confirmed, failed)

mod manager;
mod memory;
mod types;

pub use manager::StateManager;
pub use memory::InMemoryStore;
pub use types::{NewPendingTransaction, PendingTransaction, TransactionStats};

#[cfg(test)]
pub use types::TransactionStatus;

use crate::config::DatabaseConfig;
use crate::error::SnoozeResult;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Durable store of transactions awaiting broadcast.
///
/// Every mutation touches a single record and is applied as a
/// compare-and-set on its status, so overlapping cycles cannot lose
/// updates or move a record backwards.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the payload is known.
    async fn create(&self, new: NewPendingTransaction) -> SnoozeResult<PendingTransaction>;

    async fn get(&self, id: Uuid) -> SnoozeResult<PendingTransaction>;

    /// Records that have not been submitted yet
    async fn list_unsent(&self) -> SnoozeResult<Vec<PendingTransaction>>;

    async fn list_all(&self) -> SnoozeResult<Vec<PendingTransaction>>;

    /// `Pending -> Sent`. No-op on records already past `Pending`.
    async fn mark_sent(&self, id: Uuid, tx_hash: &str) -> SnoozeResult<PendingTransaction>;

    /// `Sent -> Confirmed | Failed`. No-op on terminal records,
    /// `InvalidStateTransition` on records never sent.
    async fn mark_confirmed(&self, id: Uuid, success: bool) -> SnoozeResult<PendingTransaction>;

    async fn stats(&self) -> SnoozeResult<TransactionStats>;

    async fn health_check(&self) -> SnoozeResult<()>;
}

/// Build the store selected by the database URL
pub async fn connect(config: &DatabaseConfig) -> SnoozeResult<Arc<dyn PendingStore>> {
    if config.url.starts_with("memory://") {
        info!("Using in-memory transaction store (not durable)");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let manager = StateManager::new(config).await?;
    manager.run_migrations().await?;
    info!("Database connection established");
    Ok(Arc::new(manager))
}
