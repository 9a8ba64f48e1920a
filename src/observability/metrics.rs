//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define bridge metrics (requests, latency, ring pressure, connections)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `bridge_requests_total` (counter): answered requests by method, status
//! - `bridge_request_duration_seconds` (histogram): accept-to-reply latency
//! - `bridge_active_connections` (gauge): current connection count
//! - `bridge_submissions_total` (counter): submissions by outcome
//! - `bridge_request_overwrites_total` (counter): undrained requests destroyed
//! - `bridge_response_timeouts_total` (counter): waits that hit the deadline
//! - `bridge_orphan_responses_total` (counter): unowned responses discarded
//! - `bridge_connection_closed_total` (counter): closes by reason
//! - `bridge_accept_errors_total` (counter): failed accepts
//! - `bridge_ring_depth` (gauge): undrained entries per ring
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests and
//!   metrics-disabled deployments pay nothing
//! - Label values are small fixed sets (no request ids, no paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and start the scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "bridge_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("bridge_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_active_connections(count: u64) {
    gauge!("bridge_active_connections").set(count as f64);
}

pub fn record_submission(outcome: &'static str) {
    counter!("bridge_submissions_total", "outcome" => outcome).increment(1);
}

pub fn record_request_overwrite() {
    counter!("bridge_request_overwrites_total").increment(1);
}

pub fn record_response_timeout() {
    counter!("bridge_response_timeouts_total").increment(1);
}

pub fn record_orphan_response() {
    counter!("bridge_orphan_responses_total").increment(1);
}

pub fn record_connection_closed(reason: &'static str) {
    counter!("bridge_connection_closed_total", "reason" => reason).increment(1);
}

pub fn record_accept_error() {
    counter!("bridge_accept_errors_total").increment(1);
}

pub fn record_ring_depth(ring: &'static str, depth: usize) {
    gauge!("bridge_ring_depth", "ring" => ring).set(depth as f64);
}
