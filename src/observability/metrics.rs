//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_auth_verdicts_total` (counter): decisions by verdict and reason
//! - `gateway_login_attempts_total` (counter): login form outcomes
//! - `gateway_sessions` (gauge): sessions held in the store
//! - `gateway_connections_active` (gauge): open raw-socket connections
//! - `gateway_upstream_errors_total` (counter): backend failures by adapter
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_verdict(verdict: &'static str, reason: &'static str) {
    metrics::counter!(
        "gateway_auth_verdicts_total",
        "verdict" => verdict,
        "reason" => reason
    )
    .increment(1);
}

pub fn record_login(outcome: &'static str) {
    metrics::counter!("gateway_login_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_sessions(count: usize) {
    metrics::gauge!("gateway_sessions").set(count as f64);
}

pub fn record_active_connections(count: u64) {
    metrics::gauge!("gateway_connections_active").set(count as f64);
}

pub fn record_upstream_error(adapter: &'static str) {
    metrics::counter!("gateway_upstream_errors_total", "adapter" => adapter).increment(1);
}
