//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Mirror aggregator updates onto the `metrics` facade
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `txn_agent_metric_calls_total` (counter): calls per metric name label
//! - `txn_agent_metric_duration_seconds` (histogram): call durations per metric name label
//!
//! The aggregator picks the label and caps how many distinct names get one.
//! - `txn_agent_transactions_total` (counter): finished transactions by state
//! - `txn_agent_transaction_duration_seconds` (histogram): transaction durations
//! - `txn_agent_instrumentation_attach_total` (counter): attach attempts by framework, outcome

use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;

use crate::transaction::TransactionState;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics address: {0}")]
    InvalidAddress(#[from] AddrParseError),
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus exporter with an HTTP listener on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<SocketAddr, MetricsError> {
    let addr: SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(addr)
}

/// Record one call against an exporter label.
pub fn record_metric(name: &str, elapsed: Duration) {
    ::metrics::counter!("txn_agent_metric_calls_total", "name" => name.to_string()).increment(1);
    ::metrics::histogram!("txn_agent_metric_duration_seconds", "name" => name.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a finished transaction.
pub fn record_transaction(state: TransactionState, duration: Duration) {
    ::metrics::counter!("txn_agent_transactions_total", "state" => state.as_str()).increment(1);
    ::metrics::histogram!("txn_agent_transaction_duration_seconds", "state" => state.as_str())
        .record(duration.as_secs_f64());
}

/// Record an instrumentation attach attempt.
pub fn record_attach(framework: &'static str, attached: bool) {
    ::metrics::counter!(
        "txn_agent_instrumentation_attach_total",
        "framework" => framework,
        "attached" => if attached { "true" } else { "false" }
    )
    .increment(1);
}
