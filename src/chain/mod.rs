//! Chain module - the engine's view of the network
//!
//! This module provides:
//! - `FeeOracle`: current network fee, read once per evaluation cycle
//! - `TransactionSubmitter`: raw broadcast and receipt lookup
//! - `ChainProvider`: the ethers implementation with multi-RPC failover

pub mod provider;

pub use provider::ChainProvider;

use crate::error::SnoozeResult;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;

/// Source of the current network fee, in wei
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// Fails with `OracleUnavailable` on transport errors
    async fn current_fee(&self) -> SnoozeResult<u64>;
}

/// Broadcast of pre-signed payloads and receipt lookup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Send a `0x`-hex signed payload. Returns the submission handle.
    ///
    /// A node-side rejection (stale nonce, underpriced, ...) is reported as
    /// `SubmissionRejected`; transport failures as `ChainConnection`.
    async fn submit(&self, raw_payload: &str) -> SnoozeResult<SubmissionHandle>;

    /// `Ok(None)` while the receipt is not indexed yet
    async fn get_receipt(&self, handle: &SubmissionHandle) -> SnoozeResult<Option<Receipt>>;
}

/// Transaction hash returned by the node on acceptance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubmissionHandle(pub String);

impl SubmissionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusion receipt, reduced to what the engine needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: String,
    /// 1 = success. `None` for pre-byzantium receipts.
    pub status: Option<u64>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_status_one_is_success() {
        let mut receipt = Receipt {
            tx_hash: "0x01".to_string(),
            status: Some(1),
            block_number: Some(10),
            gas_used: Some(21_000),
        };
        assert!(receipt.is_success());

        receipt.status = Some(0);
        assert!(!receipt.is_success());

        receipt.status = None;
        assert!(!receipt.is_success());
    }
}
