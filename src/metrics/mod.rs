//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Observed network fee
//! - Evaluation cycles
//! - Transaction lifecycle outcomes
//! - Notification and health check failures

use crate::error::{SnoozeError, SnoozeResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CURRENT_FEE: GaugeVec = register_gauge_vec!(
        "snooze_current_fee_wei",
        "Network fee observed by the last evaluation cycle",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "snooze_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    // Cycle metrics
    pub static ref CYCLES: CounterVec = register_counter_vec!(
        "snooze_evaluation_cycles_total",
        "Evaluation cycles by outcome",
        &["outcome"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_REGISTERED: CounterVec = register_counter_vec!(
        "snooze_transactions_registered_total",
        "Transactions registered",
        &["source"]
    ).unwrap();

    pub static ref TX_OUTCOMES: CounterVec = register_counter_vec!(
        "snooze_transaction_outcomes_total",
        "Per-record decisions taken by the evaluator",
        &["outcome"]
    ).unwrap();

    pub static ref RECEIPT_ATTEMPTS: HistogramVec = register_histogram_vec!(
        "snooze_receipt_attempts",
        "Receipt lookups needed per submitted transaction",
        &[],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATION_FAILURES: CounterVec = register_counter_vec!(
        "snooze_notification_failures_total",
        "Notifications that could not be delivered",
        &[]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "snooze_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "snooze_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SnoozeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SnoozeError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SnoozeError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_fee(chain_id: u64, fee: u64) {
    CURRENT_FEE
        .with_label_values(&[&chain_id.to_string()])
        .set(fee as f64);
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_cycle(outcome: &str) {
    CYCLES.with_label_values(&[outcome]).inc();
}

pub fn record_registered(source: &str) {
    TX_REGISTERED.with_label_values(&[source]).inc();
}

pub fn record_outcome(outcome: &str) {
    TX_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_receipt_attempts(attempts: u32) {
    RECEIPT_ATTEMPTS
        .with_label_values(&[])
        .observe(attempts as f64);
}

pub fn record_notification_failure() {
    NOTIFICATION_FAILURES.with_label_values(&[]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
