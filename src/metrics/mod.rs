//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Order submissions and stage transitions
//! - Cancellations by failure kind
//! - Chain call latency and chain health

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

lazy_static! {
    // Order metrics
    pub static ref ORDERS_SUBMITTED: CounterVec = register_counter_vec!(
        "fusion_relayer_orders_submitted_total",
        "Orders accepted for fulfilment",
        &[]
    ).unwrap();

    pub static ref ORDERS_REJECTED: CounterVec = register_counter_vec!(
        "fusion_relayer_orders_rejected_total",
        "Orders rejected at submission",
        &["reason"]
    ).unwrap();

    pub static ref STAGE_TRANSITIONS: CounterVec = register_counter_vec!(
        "fusion_relayer_stage_transitions_total",
        "Order status transitions",
        &["status"]
    ).unwrap();

    pub static ref ORDERS_CANCELLED: CounterVec = register_counter_vec!(
        "fusion_relayer_orders_cancelled_total",
        "Orders cancelled by failure kind",
        &["kind"]
    ).unwrap();

    pub static ref ACTIVE_ORDERS: Gauge = register_gauge!(
        "fusion_relayer_active_orders",
        "Orders with a running orchestrator"
    ).unwrap();

    pub static ref SWAP_DURATION: HistogramVec = register_histogram_vec!(
        "fusion_relayer_swap_duration_seconds",
        "Time from submission to terminal status",
        &["outcome"],
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "fusion_relayer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain"]
    ).unwrap();

    pub static ref CHAIN_HEIGHT: GaugeVec = register_gauge_vec!(
        "fusion_relayer_chain_height",
        "Latest block or ledger version seen per chain",
        &["chain"]
    ).unwrap();

    pub static ref CHAIN_CALL_LATENCY: HistogramVec = register_histogram_vec!(
        "fusion_relayer_chain_call_latency_seconds",
        "Chain adapter call latency",
        &["chain", "operation", "outcome"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "fusion_relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "fusion_relayer_health_check_failure_total",
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of the default registry
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

pub fn record_order_submitted() {
    ORDERS_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_order_rejected(reason: &str) {
    ORDERS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_transition(status: &str) {
    STAGE_TRANSITIONS.with_label_values(&[status]).inc();
}

pub fn record_cancellation(kind: &str) {
    ORDERS_CANCELLED.with_label_values(&[kind]).inc();
}

pub fn record_swap_finished(outcome: &str, started: Instant) {
    SWAP_DURATION
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
}

pub fn inc_active_orders() {
    ACTIVE_ORDERS.inc();
}

pub fn dec_active_orders() {
    ACTIVE_ORDERS.dec();
}

pub fn record_chain_health(chain: &str, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_chain_height(chain: &str, height: u64) {
    CHAIN_HEIGHT.with_label_values(&[chain]).set(height as f64);
}

pub fn record_chain_call(chain: &str, operation: &str, started: Instant, success: bool) {
    CHAIN_CALL_LATENCY
        .with_label_values(&[chain, operation, if success { "ok" } else { "error" }])
        .observe(started.elapsed().as_secs_f64());
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
