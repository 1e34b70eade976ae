//! Observability infrastructure for the queue monitor
//!
//! Provides:
//! - Prometheus metrics (cycle latency, sample counts, store size, run state)
//! - Structured event logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for one data-source round trip (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Buckets for observed queue times (in seconds)
const QUEUE_TIME_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 21600.0, 86400.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cycle_duration_seconds: Histogram,
    samples_collected: IntCounter,
    samples_rejected: IntCounterVec,
    cycle_errors: IntCounter,
    store_samples: IntGauge,
    runs: IntCounterVec,
    run_active: IntGauge,
    queue_time_seconds: Histogram,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "queue_monitor_cycle_duration_seconds",
                "Time spent listing workloads and sampling one collection cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            samples_collected: register_int_counter!(
                "queue_monitor_samples_collected_total",
                "Total number of queue time samples appended to the store"
            )
            .expect("Failed to register samples_collected_total"),

            samples_rejected: register_int_counter_vec!(
                "queue_monitor_samples_rejected_total",
                "Total number of samples dropped by validation",
                &["reason"]
            )
            .expect("Failed to register samples_rejected_total"),

            cycle_errors: register_int_counter!(
                "queue_monitor_cycle_errors_total",
                "Total number of failed collection cycles"
            )
            .expect("Failed to register cycle_errors_total"),

            store_samples: register_int_gauge!(
                "queue_monitor_store_samples",
                "Number of samples currently held in the window store"
            )
            .expect("Failed to register store_samples"),

            runs: register_int_counter_vec!(
                "queue_monitor_runs_total",
                "Total number of finished bounded runs by terminal status",
                &["status"]
            )
            .expect("Failed to register runs_total"),

            run_active: register_int_gauge!(
                "queue_monitor_run_active",
                "1 while a bounded collection run is in progress"
            )
            .expect("Failed to register run_active"),

            queue_time_seconds: register_histogram!(
                "queue_monitor_queue_time_seconds",
                "Queue times of accepted samples",
                QUEUE_TIME_BUCKETS.to_vec()
            )
            .expect("Failed to register queue_time_seconds"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    /// Count accepted samples and record their queue times
    pub fn record_samples<'a>(&self, queue_times: impl IntoIterator<Item = &'a f64>) {
        let inner = self.inner();
        for queue_time in queue_times {
            inner.samples_collected.inc();
            inner.queue_time_seconds.observe(*queue_time);
        }
    }

    pub fn inc_rejected(&self, reason: &str) {
        self.inner()
            .samples_rejected
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors.inc();
    }

    pub fn set_store_samples(&self, count: usize) {
        self.inner().store_samples.set(count as i64);
    }

    pub fn set_run_active(&self, active: bool) {
        self.inner().run_active.set(i64::from(active));
    }

    pub fn inc_runs(&self, status: &str) {
        self.inner().runs.with_label_values(&[status]).inc();
    }
}

/// Structured logger for monitor events
///
/// Emits event-style records with a stable field set, tagged with the
/// cluster context the monitor is pointed at.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, history_path: &str, loaded: usize) {
        info!(
            event = "monitor_started",
            cluster = %self.cluster,
            monitor_version = %version,
            history_path = %history_path,
            loaded_samples = loaded,
            "Queue monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Queue monitor shutting down"
        );
    }

    pub fn log_run_started(&self, run_id: &str, duration_minutes: i64, interval_seconds: i64) {
        info!(
            event = "run_started",
            cluster = %self.cluster,
            run_id = %run_id,
            duration_minutes = duration_minutes,
            interval_seconds = interval_seconds,
            "Collection run started"
        );
    }

    pub fn log_run_finished(
        &self,
        run_id: &str,
        status: &str,
        iterations_completed: u64,
        cancelled: bool,
        error: Option<&str>,
    ) {
        match error {
            Some(error) => warn!(
                event = "run_finished",
                cluster = %self.cluster,
                run_id = %run_id,
                status = %status,
                iterations_completed = iterations_completed,
                cancelled = cancelled,
                error = %error,
                "Collection run failed"
            ),
            None => info!(
                event = "run_finished",
                cluster = %self.cluster,
                run_id = %run_id,
                status = %status,
                iterations_completed = iterations_completed,
                cancelled = cancelled,
                "Collection run finished"
            ),
        }
    }

    /// Log a successful cycle; `slowest` is the namespace/name of the max
    pub fn log_cycle(
        &self,
        iteration: u64,
        count: usize,
        namespaces: usize,
        mean_secs: f64,
        max_secs: f64,
        slowest: &str,
    ) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster,
            iteration = iteration,
            samples = count,
            namespaces = namespaces,
            mean_queue_secs = mean_secs,
            max_queue_secs = max_secs,
            slowest = %slowest,
            "Collection cycle completed"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("default")
    }
}
