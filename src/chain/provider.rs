//! Chain provider with multi-RPC support and automatic failover

use super::{FeeOracle, Receipt, SubmissionHandle, TransactionSubmitter};
use crate::config::{ChainConfig, FeeStrategy};
use crate::error::{SnoozeError, SnoozeResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Per-request deadline
    request_timeout: Duration,
    /// Deadline for `eth_sendRawTransaction`
    submit_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider. Builds clients only, no network calls.
    pub fn new(config: ChainConfig, request_timeout: Duration) -> SnoozeResult<Self> {
        let mut http_providers = Vec::new();

        for url in config.usable_rpc_urls() {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(SnoozeError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout,
            submit_timeout: request_timeout,
        })
    }

    pub fn with_submit_timeout(mut self, submit_timeout: Duration) -> Self {
        self.submit_timeout = submit_timeout;
        self
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Read the fee once per provider until one answers
    async fn fetch_fee(&self) -> Result<U256, String> {
        let mut last_error = String::from("no providers");

        for _ in 0..self.http_providers.len() {
            let result = match self.config.fee_strategy {
                FeeStrategy::Legacy => {
                    timeout(self.request_timeout, self.http().get_gas_price()).await
                }
                FeeStrategy::Eip1559 => timeout(self.request_timeout, self.latest_base_fee()).await,
            };

            match result {
                Ok(Ok(fee)) => return Ok(fee),
                Ok(Err(e)) => {
                    warn!("Failed to get fee from chain {}: {}", self.config.chain_id, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("Fee request timed out on chain {}", self.config.chain_id);
                    last_error = "request timed out".to_string();
                }
            }
            self.failover();
        }

        Err(last_error)
    }

    async fn latest_base_fee(&self) -> Result<U256, ProviderError> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await?
            .ok_or_else(|| ProviderError::CustomError("No latest block".to_string()))?;

        block
            .base_fee_per_gas
            .ok_or_else(|| ProviderError::CustomError("No base fee in block".to_string()))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match timeout(self.request_timeout, self.http().get_block_number()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                self.failover();
                false
            }
            Err(_) => {
                error!("Health check timed out for chain {}", self.config.chain_id);
                self.failover();
                false
            }
        }
    }
}

/// Saturate wei amounts that do not fit u64
pub fn fee_to_u64(fee: U256) -> u64 {
    if fee > U256::from(u64::MAX) {
        u64::MAX
    } else {
        fee.as_u64()
    }
}

/// Decide whether a failed `eth_sendRawTransaction` was the node refusing the
/// payload (`true`) or a transport problem (`false`).
pub fn is_node_rejection(has_rpc_response: bool, message: &str) -> bool {
    if has_rpc_response {
        return true;
    }
    let msg = message.to_lowercase();
    [
        "nonce too low",
        "already known",
        "replacement transaction underpriced",
        "transaction underpriced",
        "insufficient funds",
        "intrinsic gas too low",
        "invalid sender",
        "exceeds block gas limit",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

#[async_trait]
impl FeeOracle for ChainProvider {
    async fn current_fee(&self) -> SnoozeResult<u64> {
        let fee = self
            .fetch_fee()
            .await
            .map_err(|message| SnoozeError::OracleUnavailable {
                chain_id: self.config.chain_id,
                message,
            })?;

        debug!("Current fee on chain {}: {} wei", self.config.chain_id, fee);
        Ok(fee_to_u64(fee))
    }
}

#[async_trait]
impl TransactionSubmitter for ChainProvider {
    async fn submit(&self, raw_payload: &str) -> SnoozeResult<SubmissionHandle> {
        let hex_part = raw_payload.strip_prefix("0x").unwrap_or(raw_payload);
        let bytes = hex::decode(hex_part)
            .map_err(|e| SnoozeError::Internal(format!("Stored payload is not hex: {}", e)))?;

        let result = timeout(
            self.submit_timeout,
            self.http().send_raw_transaction(Bytes::from(bytes)),
        )
        .await;

        match result {
            Ok(Ok(pending_tx)) => Ok(SubmissionHandle(format!("{:?}", pending_tx.tx_hash()))),
            Ok(Err(e)) => {
                let message = e.to_string();
                if is_node_rejection(RpcError::as_error_response(&e).is_some(), &message) {
                    Err(SnoozeError::SubmissionRejected(message))
                } else {
                    self.failover();
                    Err(SnoozeError::ChainConnection {
                        chain_id: self.config.chain_id,
                        message,
                    })
                }
            }
            Err(_) => Err(SnoozeError::Timeout {
                operation: "send raw transaction".to_string(),
            }),
        }
    }

    async fn get_receipt(&self, handle: &SubmissionHandle) -> SnoozeResult<Option<Receipt>> {
        let tx_hash: H256 = handle.as_str().parse().map_err(|e| {
            SnoozeError::Internal(format!("Invalid submission handle {}: {:?}", handle, e))
        })?;

        let receipt = timeout(
            self.request_timeout,
            self.http().get_transaction_receipt(tx_hash),
        )
        .await
        .map_err(|_| SnoozeError::Timeout {
            operation: "transaction receipt".to_string(),
        })?
        .map_err(|e| SnoozeError::ChainConnection {
            chain_id: self.config.chain_id,
            message: e.to_string(),
        })?;

        Ok(receipt.map(|r| Receipt {
            tx_hash: format!("{:?}", r.transaction_hash),
            status: r.status.map(|s| s.as_u64()),
            block_number: r.block_number.map(|b| b.as_u64()),
            gas_used: r.gas_used.map(fee_to_u64),
        }))
    }
}
