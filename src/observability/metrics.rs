//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route kind
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_auth_failures_total` (counter): rejected credentials
//! - `gateway_rate_limited_total` (counter): 429s by route
//! - `gateway_upgrades_total` (counter): upgrade handshakes by outcome
//! - `gateway_active_splices` (gauge): spliced connections currently open
//! - `gateway_tunnel_active` (gauge): 1 while a tunnel is up
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route_kind: &'static str, start: Instant) {
    ::metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route_kind" => route_kind
    )
    .increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", "route_kind" => route_kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_auth_failure(route_kind: &'static str) {
    ::metrics::counter!("gateway_auth_failures_total", "route_kind" => route_kind).increment(1);
}

pub fn record_rate_limited(route: &str) {
    ::metrics::counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_upgrade(outcome: &'static str) {
    ::metrics::counter!("gateway_upgrades_total", "outcome" => outcome).increment(1);
}

pub fn set_active_splices(count: u64) {
    ::metrics::gauge!("gateway_active_splices").set(count as f64);
}

pub fn set_tunnel_active(active: bool) {
    ::metrics::gauge!("gateway_tunnel_active").set(if active { 1.0 } else { 0.0 });
}
