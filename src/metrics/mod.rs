//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Nonce allocation (pools, issued values, refills, resets, conflicts)
//! - Transaction submission outcomes and latency

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Allocation metrics
    pub static ref NONCE_POOLS_CREATED: CounterVec = register_counter_vec!(
        "nonce_relayer_pools_created_total",
        "Allocation states initialised from the ledger",
        &["strategy"]
    ).unwrap();

    pub static ref NONCES_ISSUED: CounterVec = register_counter_vec!(
        "nonce_relayer_nonces_issued_total",
        "Sequence numbers handed out",
        &["strategy"]
    ).unwrap();

    pub static ref NONCE_REFILLS: CounterVec = register_counter_vec!(
        "nonce_relayer_refills_total",
        "Pool refills and counter resets",
        &["strategy"]
    ).unwrap();

    pub static ref NONCE_CONFLICTS: CounterVec = register_counter_vec!(
        "nonce_relayer_conflicts_resolved_total",
        "Allocator invalidations triggered by ledger conflicts",
        &["strategy"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_ATTEMPTS: CounterVec = register_counter_vec!(
        "nonce_relayer_submission_attempts_total",
        "Submission attempts including retries",
        &[]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "nonce_relayer_transactions_submitted_total",
        "Transactions accepted by the ledger",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "nonce_relayer_transactions_confirmed_total",
        "Transactions with an observed receipt",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "nonce_relayer_transactions_failed_total",
        "Submissions that ended in an error",
        &["kind"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "nonce_relayer_submission_latency_seconds",
        "Time from submit call to terminal state",
        &["mode"],
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Render all registered metrics in the text exposition format
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_pool_created(strategy: &str) {
    NONCE_POOLS_CREATED.with_label_values(&[strategy]).inc();
}

pub fn record_nonce_issued(strategy: &str) {
    NONCES_ISSUED.with_label_values(&[strategy]).inc();
}

pub fn record_refill(strategy: &str) {
    NONCE_REFILLS.with_label_values(&[strategy]).inc();
}

pub fn record_conflict(strategy: &str) {
    NONCE_CONFLICTS.with_label_values(&[strategy]).inc();
}

pub fn record_attempt() {
    TX_ATTEMPTS.with_label_values(&[]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_confirmed() {
    TX_CONFIRMED.with_label_values(&[]).inc();
}

pub fn record_tx_failed(error: &RelayerError) {
    TX_FAILED.with_label_values(&[error.kind()]).inc();
}

pub fn record_tx_latency(mode: &str, latency_secs: f64) {
    TX_LATENCY.with_label_values(&[mode]).observe(latency_secs);
}
