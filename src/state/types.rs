//! Pending transaction record and its lifecycle status

use crate::error::{SnoozeError, SnoozeResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a stored transaction. Only ever moves forward:
/// `Pending -> Sent -> Confirmed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Sent,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Sent => "sent",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "sent" => Some(TransactionStatus::Sent),
            "confirmed" => Some(TransactionStatus::Confirmed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-signed transaction waiting for the network fee to drop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTransaction {
    pub id: Uuid,
    /// Normalised `0x`-prefixed lowercase hex
    pub raw_payload: String,
    /// keccak256 of the payload bytes, which is also its on-chain hash
    pub payload_hash: String,
    /// Max fee in wei at which the payload may be broadcast
    pub fee_threshold: u64,
    pub status: TransactionStatus,
    /// Submission handle returned by the node
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn is_sent(&self) -> bool {
        self.status != TransactionStatus::Pending
    }

    pub fn is_confirmed_success(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }

    /// Eligible when the fee is at or below the threshold
    pub fn is_eligible(&self, fee: u64) -> bool {
        fee <= self.fee_threshold
    }

    /// Shortened payload hash for log lines
    pub fn short_hash(&self) -> &str {
        let end = self.payload_hash.len().min(18);
        &self.payload_hash[..end]
    }
}

/// Validated input for `PendingStore::create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPendingTransaction {
    pub raw_payload: String,
    pub payload_hash: String,
    pub fee_threshold: u64,
}

impl NewPendingTransaction {
    /// Normalise and validate a signed payload and threshold
    pub fn new(raw_payload: &str, fee_threshold: u64) -> SnoozeResult<Self> {
        if fee_threshold == 0 {
            return Err(SnoozeError::InvalidRequest(
                "fee threshold must be greater than zero".to_string(),
            ));
        }
        if fee_threshold > i64::MAX as u64 {
            return Err(SnoozeError::InvalidRequest(format!(
                "fee threshold {} is too large",
                fee_threshold
            )));
        }

        let trimmed = raw_payload.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if hex_part.is_empty() {
            return Err(SnoozeError::InvalidRequest(
                "signed transaction payload is empty".to_string(),
            ));
        }

        let bytes = hex::decode(hex_part).map_err(|e| {
            SnoozeError::InvalidRequest(format!("signed transaction is not valid hex: {}", e))
        })?;

        Ok(Self {
            raw_payload: format!("0x{}", hex::encode(&bytes)),
            payload_hash: payload_hash(&bytes),
            fee_threshold,
        })
    }

    /// Materialise a fresh record in the `Pending` state
    pub fn into_record(self) -> PendingTransaction {
        let now = Utc::now();
        PendingTransaction {
            id: Uuid::new_v4(),
            raw_payload: self.raw_payload,
            payload_hash: self.payload_hash,
            fee_threshold: self.fee_threshold,
            status: TransactionStatus::Pending,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// keccak256 of the raw bytes as `0x` hex
pub fn payload_hash(bytes: &[u8]) -> String {
    let digest = Keccak256::digest(bytes);
    format!("0x{}", hex::encode(digest))
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub pending: u64,
    pub sent: u64,
    pub confirmed: u64,
    pub failed: u64,
}

impl TransactionStats {
    pub fn add(&mut self, status: TransactionStatus, count: u64) {
        match status {
            TransactionStatus::Pending => self.pending += count,
            TransactionStatus::Sent => self.sent += count,
            TransactionStatus::Confirmed => self.confirmed += count,
            TransactionStatus::Failed => self.failed += count,
        }
    }
}
