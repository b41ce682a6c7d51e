//! Prometheus metrics for monitoring.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`install_exporter`] registers the Prometheus recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use crate::error::{Error, Result};

/// Install the global Prometheus recorder.
pub fn install_exporter() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {}", e)))
}

/// Count one dispatched JSON-RPC method.
pub fn record_request(method: &str, elapsed_secs: f64) {
    counter!("mcp_requests_total", "method" => method.to_string()).increment(1);
    histogram!("mcp_request_duration_seconds", "method" => method.to_string())
        .record(elapsed_secs);
}

/// Count one tool invocation with its outcome (`ok` / `error`).
pub fn record_tool_call(tool: &str, outcome: &'static str) {
    counter!("mcp_tool_calls_total", "tool" => tool.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Count one query refused by the guard.
pub fn record_query_rejected() {
    counter!("mcp_queries_rejected_total").increment(1);
}

pub fn record_session_created() {
    counter!("mcp_sessions_created_total").increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!("mcp_active_sessions").set(count as f64);
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        record_request("tools/list", 0.01);
        record_tool_call("read_data", "ok");
        record_query_rejected();
        record_session_created();
        set_active_sessions(3);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        assert!(timer.elapsed_secs() > 0.0);
    }
}
