//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_dispatch_total` (counter): dispatches by cluster, node
//! - `balancer_no_available_node_total` (counter): failed dispatches by cluster
//! - `balancer_requests_total` (counter): completed requests by cluster, node, status
//! - `balancer_request_duration_seconds` (histogram): latency by cluster, node
//! - `balancer_node_in_flight` (gauge): in-flight requests per node
//! - `balancer_node_health` (gauge): 1=up, 0=down
//! - `balancer_sessions_active` (gauge): sessions per cluster
//! - `balancer_sessions_evicted_total` (counter)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(cluster: &str, node: &str, in_flight: usize) {
    metrics::counter!("balancer_dispatch_total", "cluster" => cluster.to_string(), "node" => node.to_string())
        .increment(1);
    record_in_flight(node, in_flight);
}

pub fn record_no_available_node(cluster: &str) {
    metrics::counter!("balancer_no_available_node_total", "cluster" => cluster.to_string()).increment(1);
}

pub fn record_request(cluster: &str, node: &str, status: u16, latency: Duration) {
    metrics::counter!(
        "balancer_requests_total",
        "cluster" => cluster.to_string(),
        "node" => node.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "balancer_request_duration_seconds",
        "cluster" => cluster.to_string(),
        "node" => node.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_in_flight(node: &str, in_flight: usize) {
    metrics::gauge!("balancer_node_in_flight", "node" => node.to_string()).set(in_flight as f64);
}

pub fn record_node_health(node: &str, up: bool) {
    metrics::gauge!("balancer_node_health", "node" => node.to_string()).set(if up { 1.0 } else { 0.0 });
}

pub fn record_active_sessions(cluster: &str, count: usize) {
    metrics::gauge!("balancer_sessions_active", "cluster" => cluster.to_string()).set(count as f64);
}

pub fn record_sessions_evicted(count: usize) {
    metrics::counter!("balancer_sessions_evicted_total").increment(count as u64);
}
