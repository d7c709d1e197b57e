//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): forwarded requests by method, status, outcome
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by method, outcome
//! - `gateway_config_reloads_total` (counter): accepted configuration reloads
//!
//! Until [`init_metrics`] installs the Prometheus recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one forwarded request.
///
/// `outcome` is one of `success`, `upstream_status`, `network`, `malformed`, `rejected`.
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "outcome" => outcome,
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record an accepted configuration reload.
pub fn record_config_reload() {
    metrics::counter!("gateway_config_reloads_total").increment(1);
}
