//! Metrics collection for batch runs
//!
//! Provides Prometheus-compatible metrics for run outcomes, per-task
//! outcomes and run duration, labelled by backend.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

use crate::batch::BatchOutcome;

lazy_static! {
    /// Counter for finished batch runs
    static ref BATCH_RUNS: IntCounterVec = register_int_counter_vec!(
        "bounded_batch_runs_total",
        "Total number of finished batch runs",
        &["backend", "status"]
    ).expect("batch run counter registers once");

    /// Counter for task outcomes
    static ref TASK_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "bounded_batch_tasks_total",
        "Total number of task outcomes",
        &["backend", "outcome"]
    ).expect("task outcome counter registers once");

    /// Histogram for run duration
    static ref RUN_DURATION: HistogramVec = register_histogram_vec!(
        "bounded_batch_run_duration_seconds",
        "Batch run duration in seconds",
        &["backend"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).expect("run duration histogram registers once");
}

/// Metrics recorder for one backend
#[derive(Debug, Clone, Copy)]
pub struct BatchMetrics {
    backend: &'static str,
}

impl BatchMetrics {
    /// Create a recorder labelled with `backend`
    pub fn new(backend: &'static str) -> Self {
        Self { backend }
    }

    /// Record a finished run
    pub fn record_run<T>(&self, outcome: &BatchOutcome<T>) {
        let status = if outcome.timed_out() {
            "timed_out"
        } else if outcome.all_succeeded() {
            "ok"
        } else {
            "failed"
        };
        BATCH_RUNS.with_label_values(&[self.backend, status]).inc();

        let stats = outcome.stats();
        for (label, count) in [
            ("success", stats.succeeded),
            ("failure", stats.failed),
            ("cancelled", stats.cancelled),
        ] {
            if count > 0 {
                TASK_OUTCOMES
                    .with_label_values(&[self.backend, label])
                    .inc_by(count as u64);
            }
        }

        RUN_DURATION
            .with_label_values(&[self.backend])
            .observe(stats.elapsed.as_secs_f64());
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e).into())
}
