//! Thuglet: the worker side of the task protocol.
//!
//! A thuglet claims one task at a time, runs the analyzer against it under a
//! time bound, routes the outcome to the response and skip queues, and only
//! then acknowledges the task. Nothing that goes wrong with a single task
//! stops the loop; it is diverted to the skip queue and the worker moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::task::{Response, Task, TaskOutcome};
use crate::channel::{Delivery, MessageChannel};
use crate::config::{QueueNames, DEFAULT_TASK_TIMEOUT_SECS};
use crate::error::ChannelError;
use crate::execution::Supervisor;
use crate::metrics::Metrics;
use crate::utils::{BodyDecoder, Utf8Lossy};

/// A single worker processing tasks from the task queue.
pub struct Thuglet {
    /// Identifier used in logs.
    id: String,
    channel: Arc<dyn MessageChannel>,
    queues: QueueNames,
    supervisor: Supervisor,
    /// Bound for tasks that carry no timeout of their own.
    default_timeout: Duration,
    /// How long one claim waits on an empty queue.
    poll_interval: Duration,
    metrics: Option<Metrics>,
    decoder: Arc<dyn BodyDecoder>,
}

impl Thuglet {
    /// Creates a worker with a 30 minute default timeout and a one-second
    /// empty-queue wait.
    pub fn new(
        id: impl Into<String>,
        channel: Arc<dyn MessageChannel>,
        queues: QueueNames,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            queues,
            supervisor,
            default_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(1),
            metrics: None,
            decoder: Arc::new(Utf8Lossy),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn BodyDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Puts back the task this worker's consumer name still held when a
    /// previous run died.
    pub async fn recover(&self) -> Result<usize, ChannelError> {
        self.channel.recover(&self.queues.task).await
    }

    /// Main worker loop.
    ///
    /// Claims and processes tasks until a shutdown signal is received. A
    /// task in progress is always finished and acknowledged first.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.id, queue = %self.queues.task, "Thuglet started");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Thuglet received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.process_one().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // claim_wait already waited poll_interval
                    debug!(worker_id = %self.id, "No tasks available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim task");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Thuglet terminated");
    }

    /// Claims at most one task, processes it and acknowledges it.
    ///
    /// Returns `Ok(None)` when no task arrived within the poll interval.
    /// Only a failed claim is an error; everything after the claim is
    /// handled and routed.
    pub async fn process_one(&self) -> Result<Option<TaskOutcome>, ChannelError> {
        let Some(delivery) = self
            .channel
            .claim_wait(&self.queues.task, self.poll_interval)
            .await?
        else {
            return Ok(None);
        };

        let outcome = self.handle(&delivery).await;
        self.route(&delivery, &outcome).await;
        Ok(Some(outcome))
    }

    /// Runs a claimed task and classifies how it ended.
    pub async fn handle(&self, delivery: &Delivery) -> TaskOutcome {
        let start = Instant::now();
        let text = self.decoder.decode(&delivery.body);

        let task = match Task::from_json(&text) {
            Ok(task) => task,
            Err(e) => {
                error!(worker_id = %self.id, tag = delivery.tag, error = %e, "Malformed task message");
                let outcome = TaskOutcome::Failure {
                    original: delivery.body.clone(),
                    error: e.to_string(),
                };
                self.record(&outcome, start.elapsed());
                return outcome;
            }
        };

        let timeout = task
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        info!(
            worker_id = %self.id,
            task_id = %task.id,
            url = %task.url,
            timeout_secs = timeout.as_secs(),
            "Processing"
        );

        if let Some(ref metrics) = self.metrics {
            metrics.tasks_in_progress.inc();
        }
        let result = self.supervisor.run(&task, timeout).await;
        if let Some(ref metrics) = self.metrics {
            metrics.tasks_in_progress.dec();
        }

        let outcome = match result {
            Ok(execution) => {
                let response = Response::new(&task, execution.rc, execution.output);
                if execution.timed_out {
                    warn!(worker_id = %self.id, task_id = %task.id, url = %task.url, rc = execution.rc, "Timeout");
                    TaskOutcome::Timeout {
                        response,
                        original: delivery.body.clone(),
                    }
                } else {
                    info!(worker_id = %self.id, task_id = %task.id, url = %task.url, rc = execution.rc, "Completed");
                    TaskOutcome::Success(response)
                }
            }
            Err(e) => {
                error!(worker_id = %self.id, task_id = %task.id, url = %task.url, error = %e, "Analyzer execution failed");
                TaskOutcome::Failure {
                    original: delivery.body.clone(),
                    error: e.to_string(),
                }
            }
        };

        self.record(&outcome, start.elapsed());
        outcome
    }

    /// Publishes whatever the outcome calls for, then acknowledges the task.
    ///
    /// For a timeout the skip copy goes out before the response. A response
    /// that cannot be published sends the original to the skip queue
    /// instead, unless it is already there.
    async fn route(&self, delivery: &Delivery, outcome: &TaskOutcome) {
        let mut skipped = false;
        if let Some(original) = outcome.skipped() {
            skipped = self.publish_skip(original).await;
        }

        if let Some(response) = outcome.response() {
            let published = match serde_json::to_vec(response) {
                Ok(body) => self
                    .channel
                    .publish(&self.queues.resp, &body)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = published {
                error!(worker_id = %self.id, task_id = %response.id, error = %e, "Failed to publish response");
                if !skipped {
                    self.publish_skip(&delivery.body).await;
                }
            }
        }

        if let Err(e) = self.channel.ack(delivery).await {
            error!(worker_id = %self.id, tag = delivery.tag, error = %e, "Failed to acknowledge task");
        }
    }

    async fn publish_skip(&self, original: &[u8]) -> bool {
        match self.channel.publish(&self.queues.skip, original).await {
            Ok(()) => true,
            Err(e) => {
                error!(worker_id = %self.id, queue = %self.queues.skip, error = %e, "Failed to divert task to skip queue");
                false
            }
        }
    }

    fn record(&self, outcome: &TaskOutcome, duration: Duration) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_task(outcome.label(), duration.as_secs_f64());
        }
    }
}
