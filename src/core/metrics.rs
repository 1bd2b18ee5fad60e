// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("ticketbox_connected_clients", "Number of currently connected clients.").unwrap();
    /// Busy workers per pipeline pool, refreshed on every scrape.
    pub static ref POOL_BUSY_WORKERS: GaugeVec =
        register_gauge_vec!("ticketbox_pool_busy_workers", "Workers currently running a task, labeled by pool.", &["pool"]).unwrap();

    // --- Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("ticketbox_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections refused because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("ticketbox_connections_rejected_total", "Total number of connections refused at accept time.").unwrap();
    /// Connection teardowns, labeled by the error that caused them.
    pub static ref DISCONNECTS_TOTAL: CounterVec =
        register_counter_vec!("ticketbox_disconnects_total", "Total number of connection teardowns, labeled by reason.", &["reason"]).unwrap();
    /// Responses produced by the dispatch stage, labeled by status.
    pub static ref RESPONSES_TOTAL: CounterVec =
        register_counter_vec!("ticketbox_responses_total", "Total number of responses produced, labeled by status.", &["status"]).unwrap();

    // --- Histograms ---
    /// Time spent inside the command executor.
    pub static ref DISPATCH_LATENCY_SECONDS: Histogram =
        register_histogram!("ticketbox_dispatch_latency_seconds", "Latency of command execution in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
