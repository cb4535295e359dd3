//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_lifecycle_transitions_total` (counter): transitions by component kind, resulting status
//! - `fleet_phase_duration_seconds` (histogram): bounded-parallel fleet phases
//! - `fleet_phase_timeouts_total` (counter): phases that stopped waiting
//! - `fleet_tenant_engines` (gauge): engines by status
//! - `fleet_api_channels` (gauge): live channels per demultiplexed service
//! - `fleet_remote_calls_total` / `fleet_remote_call_duration_seconds`: channel calls
//! - `fleet_engine_commands_total` (counter): commands by name and result
//! - `fleet_process_memory_bytes` / `fleet_uptime_seconds` (gauges): sampler output

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::lifecycle::{ComponentKind, LifecycleStatus};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_lifecycle_transition(kind: ComponentKind, status: LifecycleStatus) {
    metrics::counter!(
        "fleet_lifecycle_transitions_total",
        "kind" => kind.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_fleet_phase(phase: &'static str, tenants: usize, elapsed: Duration, timed_out: bool) {
    metrics::histogram!("fleet_phase_duration_seconds", "phase" => phase).record(elapsed.as_secs_f64());
    metrics::gauge!("fleet_phase_tenants", "phase" => phase).set(tenants as f64);
    if timed_out {
        metrics::counter!("fleet_phase_timeouts_total", "phase" => phase).increment(1);
    }
}

pub fn record_engine_statuses(counts: &HashMap<LifecycleStatus, usize>) {
    for (status, count) in counts {
        metrics::gauge!("fleet_tenant_engines", "status" => status.as_str()).set(*count as f64);
    }
}

pub fn record_channel_count(service: &str, channels: usize) {
    metrics::gauge!("fleet_api_channels", "service" => service.to_string()).set(channels as f64);
}

pub fn record_remote_call(service: &str, method: &str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "fleet_remote_calls_total",
        "service" => service.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "fleet_remote_call_duration_seconds",
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_command(command: &'static str, result: &'static str) {
    metrics::counter!("fleet_engine_commands_total", "command" => command, "result" => result).increment(1);
}

pub fn record_runtime_sample(memory_bytes: u64, uptime: Duration) {
    metrics::gauge!("fleet_process_memory_bytes").set(memory_bytes as f64);
    metrics::gauge!("fleet_uptime_seconds").set(uptime.as_secs_f64());
}
