//! Submission and confirmation of a single eligible transaction
//!
//! `Submitting -> SubmitFailed | Submitted -> Confirming -> Confirmed | Reverted | Unconfirmed`

use super::retry::RetryPolicy;
use crate::chain::{Receipt, SubmissionHandle, TransactionSubmitter};
use crate::error::{SnoozeError, SnoozeResult};
use crate::events::{EngineEvent, EventBus};
use crate::state::{PendingStore, PendingTransaction};

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a resolution attempt ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    /// Node refused the payload or could not be reached; record left unsent
    SubmitFailed { reason: String, rejected: bool },
    /// Receipt status 1
    Confirmed {
        tx_hash: String,
        block_number: Option<u64>,
    },
    /// Receipt with any other status
    Reverted {
        tx_hash: String,
        status: Option<u64>,
    },
    /// Sent, but no receipt was obtained. The record stays
    /// `sent` and is not polled again.
    Unconfirmed {
        tx_hash: String,
        attempts: u32,
        reason: UnconfirmedReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconfirmedReason {
    /// Retry budget spent on "not found yet"
    TimedOut,
    /// A lookup failed for another reason
    LookupFailed(String),
    /// Shutdown or caller cancellation
    Cancelled,
}

impl Resolution {
    /// Label used in metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::SubmitFailed { rejected: true, .. } => "submit_rejected",
            Resolution::SubmitFailed { rejected: false, .. } => "submit_failed",
            Resolution::Confirmed { .. } => "confirmed",
            Resolution::Reverted { .. } => "reverted",
            Resolution::Unconfirmed {
                reason: UnconfirmedReason::Cancelled,
                ..
            } => "cancelled",
            Resolution::Unconfirmed { .. } => "unconfirmed",
        }
    }
}

enum ReceiptPoll {
    Found(Receipt, u32),
    Exhausted(u32),
    Failed(SnoozeError, u32),
    Cancelled(u32),
}

/// Submits a stored payload and waits, bounded, for its receipt
pub struct SubmissionResolver {
    submitter: Arc<dyn TransactionSubmitter>,
    store: Arc<dyn PendingStore>,
    events: EventBus,
    policy: RetryPolicy,
}

impl SubmissionResolver {
    pub fn new(
        submitter: Arc<dyn TransactionSubmitter>,
        store: Arc<dyn PendingStore>,
        events: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            submitter,
            store,
            events,
            policy,
        }
    }

    /// Submit `tx` and resolve its receipt.
    ///
    /// Every store write for the record happens before this returns. `Err` is
    /// only returned when the store itself fails.
    pub async fn resolve(
        &self,
        tx: &PendingTransaction,
        fee: u64,
        cancel: &CancellationToken,
    ) -> SnoozeResult<Resolution> {
        info!(
            "Fee {} <= threshold {}, sending transaction {} ({})",
            fee,
            tx.fee_threshold,
            tx.id,
            tx.short_hash()
        );

        let handle = match self.submitter.submit(&tx.raw_payload).await {
            Ok(handle) => handle,
            Err(e) => return Ok(self.submit_failed(tx, e)),
        };

        self.store.mark_sent(tx.id, handle.as_str()).await?;
        self.events.publish(EngineEvent::TransactionSubmitted {
            id: tx.id,
            tx_hash: handle.to_string(),
            fee,
        });
        info!("Transaction {} sent: {}", tx.id, handle);

        let resolution = match self.await_receipt(&handle, cancel).await {
            ReceiptPoll::Found(receipt, attempts) => {
                crate::metrics::record_receipt_attempts(attempts);
                self.apply_receipt(tx, &handle, receipt).await?
            }
            ReceiptPoll::Exhausted(attempts) => {
                crate::metrics::record_receipt_attempts(attempts);
                warn!(
                    "No receipt for {} after {} attempts; leaving transaction {} as sent",
                    handle, attempts, tx.id
                );
                self.events.publish(EngineEvent::ConfirmationTimedOut {
                    id: tx.id,
                    tx_hash: handle.to_string(),
                    attempts,
                });
                Resolution::Unconfirmed {
                    tx_hash: handle.to_string(),
                    attempts,
                    reason: UnconfirmedReason::TimedOut,
                }
            }
            ReceiptPoll::Failed(e, attempts) => {
                warn!(
                    "Receipt lookup for {} failed on attempt {}: {}",
                    handle, attempts, e
                );
                Resolution::Unconfirmed {
                    tx_hash: handle.to_string(),
                    attempts,
                    reason: UnconfirmedReason::LookupFailed(e.to_string()),
                }
            }
            ReceiptPoll::Cancelled(attempts) => {
                info!(
                    "Receipt polling for {} cancelled after {} attempts",
                    handle, attempts
                );
                Resolution::Unconfirmed {
                    tx_hash: handle.to_string(),
                    attempts,
                    reason: UnconfirmedReason::Cancelled,
                }
            }
        };

        Ok(resolution)
    }

    fn submit_failed(&self, tx: &PendingTransaction, e: SnoozeError) -> Resolution {
        let rejected = matches!(e, SnoozeError::SubmissionRejected(_));
        if rejected {
            // Same payload will be retried next cycle
            warn!(
                "Transaction {} ({}) rejected by node, skipping: {}",
                tx.id,
                tx.short_hash(),
                e
            );
            self.events.publish(EngineEvent::SubmissionRejected {
                id: tx.id,
                reason: e.to_string(),
            });
        } else {
            error!("Failed to send transaction {}: {}", tx.id, e);
        }

        Resolution::SubmitFailed {
            reason: e.to_string(),
            rejected,
        }
    }

    async fn apply_receipt(
        &self,
        tx: &PendingTransaction,
        handle: &SubmissionHandle,
        receipt: Receipt,
    ) -> SnoozeResult<Resolution> {
        info!(
            "Transaction hash: {} -> status: {:?}",
            handle, receipt.status
        );

        if receipt.is_success() {
            self.store.mark_confirmed(tx.id, true).await?;
            self.events.publish(EngineEvent::TransactionConfirmed {
                id: tx.id,
                tx_hash: handle.to_string(),
                block_number: receipt.block_number,
            });
            Ok(Resolution::Confirmed {
                tx_hash: handle.to_string(),
                block_number: receipt.block_number,
            })
        } else {
            self.store.mark_confirmed(tx.id, false).await?;
            self.events.publish(EngineEvent::TransactionReverted {
                id: tx.id,
                tx_hash: handle.to_string(),
            });
            Ok(Resolution::Reverted {
                tx_hash: handle.to_string(),
                status: receipt.status,
            })
        }
    }

    /// Poll under the retry policy. Cancellation wins over both the lookup
    /// and the sleep, and never writes to the store.
    async fn await_receipt(
        &self,
        handle: &SubmissionHandle,
        cancel: &CancellationToken,
    ) -> ReceiptPoll {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReceiptPoll::Cancelled(attempt - 1),
                result = self.submitter.get_receipt(handle) => result,
            };

            match lookup {
                Ok(Some(receipt)) => return ReceiptPoll::Found(receipt, attempt),
                Ok(None) => debug!(
                    "Tx {} not found yet (attempt {}/{})",
                    handle,
                    attempt,
                    self.policy.max_attempts()
                ),
                Err(e) => return ReceiptPoll::Failed(e, attempt),
            }

            if !self.policy.should_retry(attempt) {
                return ReceiptPoll::Exhausted(attempt);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReceiptPoll::Cancelled(attempt),
                _ = tokio::time::sleep(self.policy.delay_after(attempt)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockTransactionSubmitter;
    use crate::state::{InMemoryStore, NewPendingTransaction, TransactionStatus};
    use std::time::Duration;

    fn receipt(status: u64) -> Receipt {
        Receipt {
            tx_hash: "0xh1".to_string(),
            status: Some(status),
            block_number: Some(100),
            gas_used: Some(21_000),
        }
    }

    async fn setup(
        submitter: MockTransactionSubmitter,
    ) -> (SubmissionResolver, Arc<InMemoryStore>, PendingTransaction, EventBus) {
        let store = Arc::new(InMemoryStore::new());
        let tx = store
            .create(NewPendingTransaction::new("0xAA", 10).unwrap())
            .await
            .unwrap();
        let events = EventBus::new();
        let resolver = SubmissionResolver::new(
            Arc::new(submitter),
            store.clone(),
            events.clone(),
            RetryPolicy::fixed(5, Duration::from_secs(5)),
        );
        (resolver, store, tx, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_on_first_poll() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .times(1)
            .returning(|_| Ok(SubmissionHandle("0xh1".to_string())));
        submitter
            .expect_get_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(1))));

        let (resolver, store, tx, events) = setup(submitter).await;
        let mut rx = events.subscribe();

        let resolution = resolver
            .resolve(&tx, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Confirmed {
                tx_hash: "0xh1".to_string(),
                block_number: Some(100),
            }
        );

        let stored = store.get(tx.id).await.unwrap();
        assert!(stored.is_sent());
        assert!(stored.is_confirmed_success());
        assert_eq!(stored.tx_hash.as_deref(), Some("0xh1"));

        assert_eq!(rx.recv().await.unwrap().name(), "transaction_submitted");
        assert_eq!(rx.recv().await.unwrap().name(), "transaction_confirmed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_receipt_marks_failed() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(SubmissionHandle("0xh1".to_string())));
        submitter
            .expect_get_receipt()
            .times(2)
            .returning({
                let mut calls = 0;
                move |_| {
                    calls += 1;
                    if calls == 1 {
                        Ok(None)
                    } else {
                        Ok(Some(receipt(0)))
                    }
                }
            });

        let (resolver, store, tx, _events) = setup(submitter).await;
        let resolution = resolver
            .resolve(&tx, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.label(), "reverted");
        let stored = store.get(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert!(stored.is_sent());
        assert!(!stored.is_confirmed_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_budget_exhausted_leaves_sent() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(SubmissionHandle("0xh2".to_string())));
        submitter
            .expect_get_receipt()
            .times(5)
            .returning(|_| Ok(None));

        let (resolver, store, tx, events) = setup(submitter).await;
        let mut rx = events.subscribe();

        let started = tokio::time::Instant::now();
        let resolution = resolver
            .resolve(&tx, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            resolution,
            Resolution::Unconfirmed {
                tx_hash: "0xh2".to_string(),
                attempts: 5,
                reason: UnconfirmedReason::TimedOut,
            }
        );
        // four waits between five lookups
        assert_eq!(started.elapsed(), Duration::from_secs(20));

        let stored = store.get(tx.id).await.unwrap();
        assert!(stored.is_sent());
        assert!(!stored.is_confirmed_success());
        assert_eq!(stored.status, TransactionStatus::Sent);

        assert_eq!(rx.recv().await.unwrap().name(), "transaction_submitted");
        assert_eq!(rx.recv().await.unwrap().name(), "confirmation_timed_out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_leaves_record_untouched() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Err(SnoozeError::SubmissionRejected("nonce too low".to_string())));
        submitter.expect_get_receipt().never();

        let (resolver, store, tx, _events) = setup(submitter).await;
        let resolution = resolver
            .resolve(&tx, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.label(), "submit_rejected");
        let stored = store.get(tx.id).await.unwrap();
        assert_eq!(stored, tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_lookup_error_stops_polling() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(SubmissionHandle("0xh3".to_string())));
        submitter.expect_get_receipt().times(1).returning(|_| {
            Err(SnoozeError::ChainConnection {
                chain_id: 1,
                message: "connection reset".to_string(),
            })
        });

        let (resolver, store, tx, _events) = setup(submitter).await;
        let resolution = resolver
            .resolve(&tx, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            resolution,
            Resolution::Unconfirmed {
                attempts: 1,
                reason: UnconfirmedReason::LookupFailed(_),
                ..
            }
        ));
        assert_eq!(store.get(tx.id).await.unwrap().status, TransactionStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_poll_keeps_flags() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(SubmissionHandle("0xh4".to_string())));
        submitter.expect_get_receipt().returning(|_| Ok(None));

        let (resolver, store, tx, _events) = setup(submitter).await;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(7)).await;
                cancel.cancel();
            })
        };

        let resolution = resolver.resolve(&tx, 1, &cancel).await.unwrap();
        canceller.await.unwrap();

        // lookups at t=0s and t=5s, cancelled while waiting for t=10s
        assert_eq!(
            resolution,
            Resolution::Unconfirmed {
                tx_hash: "0xh4".to_string(),
                attempts: 2,
                reason: UnconfirmedReason::Cancelled,
            }
        );
        let stored = store.get(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Sent);
        assert!(!stored.is_confirmed_success());
    }
}
