//! Outcome notifications
//!
//! A listener on the engine's event bus turns successful confirmations into
//! an operator message. Delivery failures are logged and counted, never
//! returned to the engine.

mod telegram;

pub use telegram::TelegramNotifier;

use crate::error::SnoozeResult;
use crate::events::EngineEvent;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Fire-and-forget message channel
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> SnoozeResult<()>;
}

/// Subscribes to engine events and notifies on confirmed executions only
pub struct NotificationListener {
    notifier: Arc<dyn Notifier>,
    explorer_tx_url: String,
    mention: Option<String>,
}

impl NotificationListener {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        explorer_tx_url: String,
        mention: Option<String>,
    ) -> Self {
        Self {
            notifier,
            explorer_tx_url,
            mention,
        }
    }

    pub fn message_for(&self, tx_hash: &str) -> String {
        let mention = match self.mention.as_deref() {
            Some(m) if !m.is_empty() => format!(" {}", m),
            _ => String::new(),
        };
        format!(
            "Your snoozed transaction has been executed, check it out{}: {}{}",
            mention, self.explorer_tx_url, tx_hash
        )
    }

    pub async fn handle(&self, event: &EngineEvent) {
        let EngineEvent::TransactionConfirmed { id, tx_hash, .. } = event else {
            trace!("Ignoring {} for {}", event.name(), event.transaction_id());
            return;
        };

        debug!("Notifying confirmed transaction {}", id);
        if let Err(e) = self.notifier.notify(&self.message_for(tx_hash)).await {
            warn!("Notification for transaction {} failed: {}", id, e);
            crate::metrics::record_notification_failure();
        }
    }

    /// Consume events until shutdown or the bus closes.
    ///
    /// Events already queued when shutdown fires are still handled.
    pub async fn run(self, mut rx: broadcast::Receiver<EngineEvent>, shutdown: CancellationToken) {
        info!("Notification listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain(&mut rx).await;
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => self.handle(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notification listener lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Notification listener stopped");
    }

    async fn drain(&self, rx: &mut broadcast::Receiver<EngineEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.handle(&event).await,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Notification listener lagged, {} events dropped", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}
