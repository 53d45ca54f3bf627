//! Error types for the Snooze Relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum SnoozeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Signed transaction already exists: {payload_hash}")]
    Duplicate { payload_hash: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Fee oracle unavailable on chain {chain_id}: {message}")]
    OracleUnavailable { chain_id: u64, message: String },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnoozeError {
    /// Check if error is retryable on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnoozeError::OracleUnavailable { .. }
                | SnoozeError::ChainConnection { .. }
                | SnoozeError::Timeout { .. }
        )
    }

    /// Short machine-readable label, used for metrics and decision reports
    pub fn kind(&self) -> &'static str {
        match self {
            SnoozeError::Database(_) => "database",
            SnoozeError::Duplicate { .. } => "duplicate",
            SnoozeError::NotFound(_) => "not_found",
            SnoozeError::InvalidRequest(_) => "invalid_request",
            SnoozeError::OracleUnavailable { .. } => "oracle_unavailable",
            SnoozeError::ChainConnection { .. } => "chain_connection",
            SnoozeError::SubmissionRejected(_) => "submission_rejected",
            SnoozeError::Timeout { .. } => "timeout",
            SnoozeError::InvalidStateTransition { .. } => "invalid_state_transition",
            SnoozeError::Wallet(_) => "wallet",
            SnoozeError::Notification(_) => "notification",
            SnoozeError::Internal(_) => "internal",
        }
    }
}

/// Result type for relayer operations
pub type SnoozeResult<T> = Result<T, SnoozeError>;
