//! Prometheus metrics registration and export.
//!
//! Each process builds its own [`Metrics`] with a private registry and hands
//! clones of it to the components that record into it. Metric handles are
//! reference-counted, so clones share the same series.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Operational metrics for the boss and the thuglets.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Tasks published to the task queue.
    pub tasks_dispatched: IntCounter,
    /// Responses consumed from the response queue.
    pub responses_collected: IntCounter,
    /// Response bodies that could not be parsed.
    pub responses_malformed: IntCounter,
    /// The boss's outstanding-response counter.
    pub pending: IntGauge,
    /// Tasks handled by a thuglet, labeled by outcome.
    pub tasks_total: IntCounterVec,
    /// Analyzer wall-clock time in seconds, labeled by outcome.
    pub task_duration: HistogramVec,
    /// Tasks currently being executed.
    pub tasks_in_progress: IntGauge,
    /// Ready messages per queue, as last observed.
    pub queue_depth: GaugeVec,
    /// Messages drained by flush, labeled by queue.
    pub flushed_total: IntCounterVec,
}

impl Metrics {
    /// Creates all metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if metric registration fails, typically
    /// due to an invalid metric configuration.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_dispatched =
            IntCounter::new("thugd_tasks_dispatched_total", "Tasks published to the task queue")?;
        let responses_collected = IntCounter::new(
            "thugd_responses_collected_total",
            "Responses consumed from the response queue",
        )?;
        let responses_malformed = IntCounter::new(
            "thugd_responses_malformed_total",
            "Response bodies that failed to parse",
        )?;
        let pending = IntGauge::new("thugd_pending_responses", "Responses the boss still expects")?;

        let tasks_total = IntCounterVec::new(
            Opts::new("thugd_tasks_total", "Tasks handled by thuglets"),
            &["outcome"],
        )?;
        let task_duration = HistogramVec::new(
            HistogramOpts::new(
                "thugd_task_duration_seconds",
                "Analyzer execution time in seconds",
            )
            .buckets(vec![1.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
            &["outcome"],
        )?;
        let tasks_in_progress =
            IntGauge::new("thugd_tasks_in_progress", "Tasks currently being executed")?;

        let queue_depth = GaugeVec::new(
            Opts::new("thugd_queue_depth", "Ready messages in queue"),
            &["queue"],
        )?;
        let flushed_total = IntCounterVec::new(
            Opts::new("thugd_flushed_total", "Messages drained by flush"),
            &["queue"],
        )?;

        registry.register(Box::new(tasks_dispatched.clone()))?;
        registry.register(Box::new(responses_collected.clone()))?;
        registry.register(Box::new(responses_malformed.clone()))?;
        registry.register(Box::new(pending.clone()))?;
        registry.register(Box::new(tasks_total.clone()))?;
        registry.register(Box::new(task_duration.clone()))?;
        registry.register(Box::new(tasks_in_progress.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(flushed_total.clone()))?;

        Ok(Self {
            registry,
            tasks_dispatched,
            responses_collected,
            responses_malformed,
            pending,
            tasks_total,
            task_duration,
            tasks_in_progress,
            queue_depth,
            flushed_total,
        })
    }

    /// Records one finished task.
    pub fn record_task(&self, outcome: &str, duration_secs: f64) {
        self.tasks_total.with_label_values(&[outcome]).inc();
        self.task_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    /// Records the ready-message count of a queue.
    pub fn record_queue_depth(&self, queue: &str, depth: usize) {
        self.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }

    /// Count of tasks recorded with `outcome`.
    pub fn task_count(&self, outcome: &str) -> u64 {
        self.tasks_total.with_label_values(&[outcome]).get()
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("tasks_dispatched", &self.tasks_dispatched.get())
            .field("responses_collected", &self.responses_collected.get())
            .field("pending", &self.pending.get())
            .finish_non_exhaustive()
    }
}
