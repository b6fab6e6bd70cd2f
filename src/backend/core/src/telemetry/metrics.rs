//! Prometheus metrics for the scheduling engine.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate_core::telemetry::metrics::EngineMetrics;
//!
//! EngineMetrics::record_submission("inserted");
//! EngineMetrics::set_capacity_free(2);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Handle onto the installed Prometheus recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder installed.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and describe the engine metrics.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn init_metrics(enabled: bool, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets(&[0.05, 0.25, 1.0, 5.0, 30.0, 120.0, 600.0, 1800.0, 3600.0])?
        .install_recorder()?;

    register_metric_descriptions();

    ::tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Admission control
    describe_counter!(
        "tollgate_dispatch_passes_total",
        "Dispatch passes by outcome (released, no_capacity, idle, error)"
    );
    describe_counter!(
        "tollgate_jobs_released_total",
        "Queue entries released to the runtime"
    );
    describe_counter!(
        "tollgate_queue_submissions_total",
        "Queue submissions by outcome"
    );
    describe_gauge!(
        "tollgate_queue_waiting",
        "WAITING entries observed by the last starved dispatch pass"
    );
    describe_gauge!(
        "tollgate_capacity_free",
        "Free worker slots computed by the last dispatch pass"
    );

    // Retries and chains
    describe_counter!("tollgate_retries_total", "Failed jobs resubmitted for retry");
    describe_counter!(
        "tollgate_retries_exhausted_total",
        "Failed jobs that ran out of retries"
    );
    describe_counter!(
        "tollgate_chain_handoffs_total",
        "Chain links advanced to their second job"
    );

    // Execution
    describe_counter!(
        "tollgate_jobs_executed_total",
        "Job executions by kind and outcome"
    );
    describe_histogram!(
        "tollgate_job_duration_seconds",
        "Job execution duration in seconds"
    );
    describe_gauge!("tollgate_jobs_executing", "Jobs currently executing");

    describe_counter!("tollgate_errors_total", "Engine errors by code");
}

/// Recording helpers for engine metrics.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record one dispatch pass.
    pub fn record_dispatch(queue: &str, outcome: &'static str, released: usize) {
        counter!("tollgate_dispatch_passes_total", "outcome" => outcome).increment(1);
        if released > 0 {
            counter!("tollgate_jobs_released_total", "queue" => queue.to_string())
                .increment(released as u64);
        }
    }

    pub fn record_submission(outcome: &'static str) {
        counter!("tollgate_queue_submissions_total", "outcome" => outcome).increment(1);
    }

    pub fn set_queue_waiting(queue: &str, waiting: u64) {
        gauge!("tollgate_queue_waiting", "queue" => queue.to_string()).set(waiting as f64);
    }

    pub fn set_capacity_free(free: i64) {
        gauge!("tollgate_capacity_free").set(free.max(0) as f64);
    }

    pub fn record_retry(kind: &str) {
        counter!("tollgate_retries_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_retry_exhausted(kind: &str) {
        counter!("tollgate_retries_exhausted_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_chain_handoff(chain: &str) {
        counter!("tollgate_chain_handoffs_total", "chain" => chain.to_string()).increment(1);
    }

    /// Record a finished execution.
    pub fn record_execution(kind: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "tollgate_jobs_executed_total",
            "kind" => kind.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("tollgate_job_duration_seconds", "kind" => kind.to_string())
            .record(duration.as_secs_f64());
    }

    pub fn set_jobs_executing(count: usize) {
        gauge!("tollgate_jobs_executing").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let registry = init_metrics(false, "tollgate").unwrap();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_helpers_without_recorder() {
        // No recorder installed: recording must be a silent no-op.
        EngineMetrics::record_dispatch("default", "released", 3);
        EngineMetrics::record_submission("inserted");
        EngineMetrics::set_capacity_free(-2);
        EngineMetrics::record_execution("mirror_extension", true, Duration::from_millis(20));
    }
}
