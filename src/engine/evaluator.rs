//! Broadcast Evaluator

use super::lease::RecordLeases;
use crate::chain::FeeOracle;
use crate::error::{SnoozeError, SnoozeResult};
use crate::state::{PendingStore, PendingTransaction};
use crate::tx::{Resolution, SubmissionResolver};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one evaluation cycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing unsent; the fee oracle was not consulted
    NoPendingWork,
    Evaluated(CycleReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Fee read once for the whole cycle
    pub fee: u64,
    pub records: Vec<RecordReport>,
}

impl CycleReport {
    pub fn count(&self, label: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.decision.label() == label)
            .count()
    }

    #[cfg(test)]
    pub fn record(&self, id: Uuid) -> Option<&RecordReport> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// What the cycle did with one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// `fee > threshold`
    NotYetEligible,
    /// Leased by an overlapping cycle
    Busy,
    /// Submitted by an overlapping cycle after this one listed it
    AlreadySent,
    /// Shutdown before the record was handed to the resolver
    Cancelled,
    Resolved { resolution: Resolution },
    /// Store failure while resolving this record
    Error { kind: String, message: String },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::NotYetEligible => "not_yet_eligible",
            Decision::Busy => "busy",
            Decision::AlreadySent => "already_sent",
            Decision::Cancelled => "cancelled",
            Decision::Resolved { resolution } => resolution.label(),
            Decision::Error { .. } => "error",
        }
    }
}

/// A touched record and its state after the cycle
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub id: Uuid,
    pub fee_threshold: u64,
    pub tx_hash: Option<String>,
    pub is_sent: bool,
    pub is_confirmed_success: bool,
    #[serde(flatten)]
    pub decision: Decision,
}

impl RecordReport {
    fn from_record(tx: &PendingTransaction, decision: Decision) -> Self {
        Self {
            id: tx.id,
            fee_threshold: tx.fee_threshold,
            tx_hash: tx.tx_hash.clone(),
            is_sent: tx.is_sent(),
            is_confirmed_success: tx.is_confirmed_success(),
            decision,
        }
    }

    fn resolved(tx: &PendingTransaction, resolution: Resolution) -> Self {
        let (is_sent, is_confirmed_success, tx_hash) = match &resolution {
            Resolution::SubmitFailed { .. } => (false, false, None),
            Resolution::Confirmed { tx_hash, .. } => (true, true, Some(tx_hash.clone())),
            Resolution::Reverted { tx_hash, .. } | Resolution::Unconfirmed { tx_hash, .. } => {
                (true, false, Some(tx_hash.clone()))
            }
        };

        Self {
            id: tx.id,
            fee_threshold: tx.fee_threshold,
            tx_hash,
            is_sent,
            is_confirmed_success,
            decision: Decision::Resolved { resolution },
        }
    }
}

/// Compares the current fee against every unsent transaction and hands
/// eligible ones to the resolver
pub struct BroadcastEvaluator {
    store: Arc<dyn PendingStore>,
    oracle: Arc<dyn FeeOracle>,
    resolver: SubmissionResolver,
    leases: RecordLeases,
    /// Cycles started with `run_detached`
    cycles: TaskTracker,
    chain_id: u64,
    max_concurrent: usize,
}

impl BroadcastEvaluator {
    pub fn new(
        store: Arc<dyn PendingStore>,
        oracle: Arc<dyn FeeOracle>,
        resolver: SubmissionResolver,
        chain_id: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            oracle,
            resolver,
            leases: RecordLeases::new(),
            cycles: TaskTracker::new(),
            chain_id,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run one evaluation cycle.
    ///
    /// Fails only when the unsent listing or the fee oracle fails; errors on
    /// individual records are reported in their `Decision`.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> SnoozeResult<CycleOutcome> {
        let unsent = match self.store.list_unsent().await {
            Ok(unsent) => unsent,
            Err(e) => {
                crate::metrics::record_cycle("store_error");
                return Err(e);
            }
        };

        if unsent.is_empty() {
            debug!("No pending signed transactions");
            crate::metrics::record_cycle("no_pending_work");
            return Ok(CycleOutcome::NoPendingWork);
        }

        let fee = match self.oracle.current_fee().await {
            Ok(fee) => fee,
            Err(e) => {
                warn!("Fee oracle unavailable, skipping cycle: {}", e);
                crate::metrics::record_cycle("oracle_unavailable");
                return Err(e);
            }
        };
        crate::metrics::record_fee(self.chain_id, fee);

        info!(
            "Evaluating {} pending transactions at fee {} wei",
            unsent.len(),
            fee
        );

        let records: Vec<RecordReport> = stream::iter(unsent)
            .map(|tx| self.evaluate(tx, fee, cancel))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for record in &records {
            crate::metrics::record_outcome(record.decision.label());
        }
        crate::metrics::record_cycle("evaluated");

        Ok(CycleOutcome::Evaluated(CycleReport { fee, records }))
    }

    /// Run one cycle on its own task and wait for it.
    ///
    /// Dropping the returned future does not stop the cycle, so a broadcast
    /// accepted by the node is always followed by its `mark_sent`.
    pub async fn run_detached(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> SnoozeResult<CycleOutcome> {
        let evaluator = Arc::clone(self);
        self.cycles
            .spawn(async move { evaluator.run_cycle(&cancel).await })
            .await
            .map_err(|e| SnoozeError::Internal(format!("Evaluation cycle task failed: {}", e)))?
    }

    /// Wait for every detached cycle still running
    pub async fn drain(&self) {
        self.cycles.close();
        self.cycles.wait().await;
    }

    async fn evaluate(
        &self,
        tx: PendingTransaction,
        fee: u64,
        cancel: &CancellationToken,
    ) -> RecordReport {
        if !tx.is_eligible(fee) {
            debug!(
                "Fee {} still above threshold {} for {}",
                fee, tx.fee_threshold, tx.id
            );
            return RecordReport::from_record(&tx, Decision::NotYetEligible);
        }

        if cancel.is_cancelled() {
            return RecordReport::from_record(&tx, Decision::Cancelled);
        }

        let Some(_lease) = self.leases.try_acquire(tx.id) else {
            debug!(
                "Transaction {} is held by another cycle ({} leases active)",
                tx.id,
                self.leases.len()
            );
            return RecordReport::from_record(&tx, Decision::Busy);
        };

        // The listing may predate a submission made by an overlapping cycle
        let current = match self.store.get(tx.id).await {
            Ok(current) => current,
            Err(e) => {
                error!("Failed to reload transaction {}: {}", tx.id, e);
                return RecordReport::from_record(
                    &tx,
                    Decision::Error {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                );
            }
        };
        if current.is_sent() {
            return RecordReport::from_record(&current, Decision::AlreadySent);
        }

        match self.resolver.resolve(&current, fee, cancel).await {
            Ok(resolution) => RecordReport::resolved(&current, resolution),
            Err(e) => {
                error!("Error resolving transaction {}: {}", current.id, e);
                let latest = self.store.get(current.id).await.unwrap_or(current);
                RecordReport::from_record(
                    &latest,
                    Decision::Error {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    /// Scheduled loop: one cycle per tick until `shutdown` fires
    pub async fn run(&self, poll_interval: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Broadcast scheduler started, polling every {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_cycle(&shutdown).await {
                        Ok(CycleOutcome::NoPendingWork) => {}
                        Ok(CycleOutcome::Evaluated(report)) => info!(
                            "Cycle done at fee {}: {} evaluated, {} not yet eligible, {} confirmed",
                            report.fee,
                            report.records.len(),
                            report.count("not_yet_eligible"),
                            report.count("confirmed")
                        ),
                        Err(e) if e.is_retryable() => warn!("Evaluation cycle aborted: {}", e),
                        Err(e) => error!("Evaluation cycle failed: {}", e),
                    }
                }
            }
        }

        info!("Broadcast scheduler stopped");
    }
}
