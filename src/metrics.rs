//! Prometheus metrics and push statistics.
//!
//! A single [`Metrics`] value is created at startup and shared by reference.
//! It is both the Prometheus registry served on the metrics endpoint and the
//! [`StatsSink`] the dispatch core reports into.
//!
//! No device tokens or message content are ever used as label values.

use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::push::Platform;
use crate::queue::WorkerStats;

/// Aggregate push counters the dispatch core reports into.
pub trait StatsSink: Send + Sync {
    /// Add `count` attempted delivery targets.
    fn add_total_count(&self, count: u64);

    /// Add `count` delivered targets for `platform`.
    fn add_success(&self, platform: Platform, count: u64);

    /// Add `count` failed targets for `platform`.
    fn add_error(&self, platform: Platform, count: u64);
}

/// All metrics for the pushgate server.
#[derive(Clone)]
pub struct Metrics {
    /// The Prometheus registry containing all metrics.
    pub registry: Registry,

    // === Push Metrics ===
    /// Total number of delivery targets accepted for dispatch.
    pub total_count: IntCounter,

    /// Delivered targets by platform.
    pub push_success_total: IntCounterVec,

    /// Failed targets by platform.
    pub push_error_total: IntCounterVec,

    // === Queue Metrics ===
    pub queue_busy_workers: IntGauge,
    pub queue_submitted_tasks: IntGauge,
    pub queue_success_tasks: IntGauge,
    pub queue_failure_tasks: IntGauge,

    // === Server Metrics ===
    /// Timestamp when the server started (Unix seconds).
    pub server_start_time_seconds: Gauge,

    /// Server version information.
    pub server_info: IntGaugeVec,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let total_count = IntCounter::with_opts(Opts::new(
            "pushgate_total_count",
            "Total number of delivery targets accepted for dispatch",
        ))?;
        registry.register(Box::new(total_count.clone()))?;

        let push_success_total = IntCounterVec::new(
            Opts::new(
                "pushgate_push_success_total",
                "Total number of successfully delivered targets",
            ),
            &["platform"],
        )?;
        registry.register(Box::new(push_success_total.clone()))?;

        let push_error_total = IntCounterVec::new(
            Opts::new(
                "pushgate_push_error_total",
                "Total number of targets that failed delivery",
            ),
            &["platform"],
        )?;
        registry.register(Box::new(push_error_total.clone()))?;

        let queue_busy_workers = IntGauge::with_opts(Opts::new(
            "pushgate_queue_busy_workers",
            "Number of workers currently running a task",
        ))?;
        registry.register(Box::new(queue_busy_workers.clone()))?;

        let queue_submitted_tasks = IntGauge::with_opts(Opts::new(
            "pushgate_queue_submitted_tasks",
            "Number of tasks accepted by the queue",
        ))?;
        registry.register(Box::new(queue_submitted_tasks.clone()))?;

        let queue_success_tasks = IntGauge::with_opts(Opts::new(
            "pushgate_queue_success_tasks",
            "Number of tasks that completed successfully",
        ))?;
        registry.register(Box::new(queue_success_tasks.clone()))?;

        let queue_failure_tasks = IntGauge::with_opts(Opts::new(
            "pushgate_queue_failure_tasks",
            "Number of tasks that failed",
        ))?;
        registry.register(Box::new(queue_failure_tasks.clone()))?;

        let server_start_time_seconds = Gauge::with_opts(Opts::new(
            "pushgate_server_start_time_seconds",
            "Unix timestamp when the server started",
        ))?;
        registry.register(Box::new(server_start_time_seconds.clone()))?;

        let server_info = IntGaugeVec::new(
            Opts::new("pushgate_server_info", "Server version and build information"),
            &["version"],
        )?;
        registry.register(Box::new(server_info.clone()))?;

        let metrics = Self {
            registry,
            total_count,
            push_success_total,
            push_error_total,
            queue_busy_workers,
            queue_submitted_tasks,
            queue_success_tasks,
            queue_failure_tasks,
            server_start_time_seconds,
            server_info,
        };

        // Expose every platform series from the start, even at zero.
        for platform in Platform::ALL {
            metrics.push_success_total.with_label_values(&[platform.as_str()]);
            metrics.push_error_total.with_label_values(&[platform.as_str()]);
        }

        Ok(metrics)
    }

    /// Initialize server startup metrics.
    pub fn init_server_info(&self, version: &str) {
        self.server_start_time_seconds.set(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        self.server_info.with_label_values(&[version]).set(1);
    }

    /// Copy queue statistics into the queue gauges.
    pub fn observe_queue(&self, stats: &WorkerStats) {
        self.queue_busy_workers.set(stats.busy_workers as i64);
        self.queue_submitted_tasks.set(stats.submitted_tasks as i64);
        self.queue_success_tasks.set(stats.success_tasks as i64);
        self.queue_failure_tasks.set(stats.failure_tasks as i64);
    }

    /// Total targets accepted so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total_count.get()
    }

    /// Delivered targets for `platform`.
    #[must_use]
    pub fn success(&self, platform: Platform) -> u64 {
        self.push_success_total
            .with_label_values(&[platform.as_str()])
            .get()
    }

    /// Failed targets for `platform`.
    #[must_use]
    pub fn error(&self, platform: Platform) -> u64 {
        self.push_error_total
            .with_label_values(&[platform.as_str()])
            .get()
    }

    /// Gather all metrics for export.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

impl StatsSink for Metrics {
    fn add_total_count(&self, count: u64) {
        self.total_count.inc_by(count);
    }

    fn add_success(&self, platform: Platform, count: u64) {
        self.push_success_total
            .with_label_values(&[platform.as_str()])
            .inc_by(count);
    }

    fn add_error(&self, platform: Platform, count: u64) {
        self.push_error_total
            .with_label_values(&[platform.as_str()])
            .inc_by(count);
    }
}
