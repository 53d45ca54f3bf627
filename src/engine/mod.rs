//! Broadcast engine
//!
//! Each evaluation cycle:
//! 1. Lists unsent transactions (stops early with `NoPendingWork`)
//! 2. Reads the network fee once
//! 3. Hands every transaction with `fee <= threshold` to the resolver

pub mod evaluator;
pub mod lease;

pub use evaluator::{BroadcastEvaluator, CycleOutcome, RecordReport};
