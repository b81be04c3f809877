//! Boss: the controller side of the task protocol.
//!
//! The boss publishes a batch of tasks, then drains the response queue until
//! every task it dispatched is accounted for. It can also flush all three
//! queues as an administrative reset.
//!
//! # Completion accounting
//!
//! `pending` starts at the number of dispatched tasks and drops by one per
//! consumed response, whether or not that response belongs to this batch.
//! Collection keeps going while `pending > 0` or the response queue is
//! non-empty. A task that fails outright produces no response, so `pending`
//! may never reach zero on its own; the loop then ends only once the
//! response queue is also empty. A response published between the emptiness
//! check and the next claim is left for the next run. Set a deadline with
//! [`Boss::with_deadline`] to bound the wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::task::{Response, Task};
use crate::channel::MessageChannel;
use crate::config::QueueNames;
use crate::error::BossError;
use crate::metrics::Metrics;
use crate::utils::{BodyDecoder, Utf8Lossy};

/// Hook invoked for every collected response.
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, response: &Response);
}

impl<F> ResponseHandler for F
where
    F: Fn(&Response) + Send + Sync,
{
    fn handle(&self, response: &Response) {
        self(response)
    }
}

/// Default hook: prints the url, then every field, then a rule line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintResponse;

impl PrintResponse {
    /// The text printed for one response.
    pub fn render(response: &Response) -> String {
        let mut out = String::new();
        out.push_str(&response.url);
        out.push('\n');
        for (key, value) in [
            ("id", response.id.clone()),
            ("rc", response.rc.to_string()),
            ("url", response.url.clone()),
            ("raw", response.raw.clone()),
        ] {
            out.push_str(key);
            out.push('\n');
            out.push_str(&value);
            out.push('\n');
        }
        out.push_str(&"-".repeat(80));
        out
    }
}

impl ResponseHandler for PrintResponse {
    fn handle(&self, response: &Response) {
        println!("{}", Self::render(response));
    }
}

/// What one collection pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectSummary {
    /// Responses handed to the hook.
    pub handled: usize,
    /// Bodies consumed but not parseable as a response.
    pub malformed: usize,
    /// `pending` when collection stopped. Negative if stray responses from
    /// earlier runs were collected.
    pub pending: i64,
    /// Whether collection stopped because the deadline elapsed.
    pub deadline_elapsed: bool,
}

/// Dispatches tasks and collects their responses.
pub struct Boss {
    channel: Arc<dyn MessageChannel>,
    queues: QueueNames,
    tasks: Vec<Task>,
    /// Responses still expected.
    pending: i64,
    handler: Box<dyn ResponseHandler>,
    /// Sleep between claims on an empty response queue.
    poll_interval: Duration,
    deadline: Option<Duration>,
    metrics: Option<Metrics>,
    interrupt: Option<broadcast::Receiver<()>>,
    decoder: Arc<dyn BodyDecoder>,
}

impl Boss {
    pub fn new(channel: Arc<dyn MessageChannel>, queues: QueueNames) -> Self {
        Self {
            channel,
            queues,
            tasks: Vec::new(),
            pending: 0,
            handler: Box::new(PrintResponse),
            poll_interval: Duration::from_secs(1),
            deadline: None,
            metrics: None,
            interrupt: None,
            decoder: Arc::new(Utf8Lossy),
        }
    }

    /// Replaces the response hook.
    pub fn with_handler(mut self, handler: impl ResponseHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stops collection after `deadline` even if responses are outstanding.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Dispatch and collection stop with [`BossError::Interrupted`] once a
    /// message arrives on `interrupt`.
    pub fn with_interrupt(mut self, interrupt: broadcast::Receiver<()>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn BodyDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Queues tasks for the next dispatch.
    pub fn add_tasks(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.extend(tasks);
    }

    /// Puts back responses this boss's consumer name still held when a
    /// previous run died before acknowledging them.
    pub async fn recover(&self) -> Result<usize, BossError> {
        Ok(self.channel.recover(&self.queues.resp).await?)
    }

    /// Tasks not yet dispatched.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn pending(&self) -> i64 {
        self.pending
    }

    /// Publishes every queued task to the task queue.
    ///
    /// `pending` is set to the batch size before the first publish. Tasks
    /// go out last-added first. Returns the number published.
    pub async fn dispatch(&mut self) -> Result<usize, BossError> {
        self.pending = self.tasks.len() as i64;
        self.set_pending_gauge();
        println!("[*] ThugBoss created {} tasks", self.pending);

        let mut sent = 0;
        loop {
            if self.interrupted() {
                return Err(BossError::Interrupted);
            }
            let Some(task) = self.tasks.pop() else {
                break;
            };

            println!("[+] sending task: {}", task.url);
            let body = serde_json::to_vec(&task)?;
            self.channel.publish(&self.queues.task, &body).await?;
            debug!(task_id = %task.id, url = %task.url, queue = %self.queues.task, "Dispatched task");

            if let Some(ref metrics) = self.metrics {
                metrics.tasks_dispatched.inc();
            }
            sent += 1;
        }

        info!(sent, queue = %self.queues.task, "Dispatch complete");
        Ok(sent)
    }

    /// Drains the response queue until `pending` reaches zero and the queue
    /// is empty, or the deadline elapses.
    pub async fn collect(&mut self) -> Result<CollectSummary, BossError> {
        let started = Instant::now();
        let mut summary = CollectSummary::default();

        loop {
            if self.interrupted() {
                return Err(BossError::Interrupted);
            }

            if self.pending <= 0 {
                let remaining = self.channel.message_count(&self.queues.resp).await?;
                if let Some(ref metrics) = self.metrics {
                    metrics.record_queue_depth(&self.queues.resp, remaining);
                }
                if remaining == 0 {
                    break;
                }
            }

            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    warn!(
                        pending = self.pending,
                        deadline_secs = deadline.as_secs(),
                        "Collection deadline elapsed with responses outstanding"
                    );
                    summary.deadline_elapsed = true;
                    break;
                }
            }

            let Some(body) = self.channel.consume_one(&self.queues.resp).await? else {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };

            self.pending -= 1;
            self.set_pending_gauge();
            if let Some(ref metrics) = self.metrics {
                metrics.responses_collected.inc();
            }

            let text = self.decoder.decode(&body);
            match Response::from_json(&text) {
                Ok(response) => {
                    info!(
                        task_id = %response.id,
                        url = %response.url,
                        rc = response.rc,
                        pending = self.pending,
                        "Collected response"
                    );
                    self.handler.handle(&response);
                    summary.handled += 1;
                }
                Err(e) => {
                    warn!(error = %e, pending = self.pending, "Skipping malformed response");
                    if let Some(ref metrics) = self.metrics {
                        metrics.responses_malformed.inc();
                    }
                    summary.malformed += 1;
                }
            }
        }

        summary.pending = self.pending;
        info!(
            handled = summary.handled,
            malformed = summary.malformed,
            pending = summary.pending,
            "Collection finished"
        );
        Ok(summary)
    }

    /// Empties the task, response and skip queues.
    ///
    /// Racy by nature: a worker mid-task can publish into a queue right
    /// after it was reported flushed. Returns the number of messages drained
    /// per queue, in flush order.
    pub async fn flush(&self) -> Result<Vec<(String, usize)>, BossError> {
        let mut drained = Vec::with_capacity(3);

        for queue in self.queues.all() {
            let mut count = 0;
            while self.channel.consume_one(queue).await?.is_some() {
                count += 1;
            }

            if let Some(ref metrics) = self.metrics {
                metrics
                    .flushed_total
                    .with_label_values(&[queue])
                    .inc_by(count as u64);
            }
            info!(queue = %queue, drained = count, "Flushed queue");
            println!("[*] flushed queue: {}", queue);
            drained.push((queue.to_string(), count));
        }

        Ok(drained)
    }

    fn interrupted(&mut self) -> bool {
        let Some(ref mut interrupt) = self.interrupt else {
            return false;
        };
        match interrupt.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => true,
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => false,
        }
    }

    fn set_pending_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.pending.set(self.pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use std::sync::Mutex;

    fn boss(channel: &Arc<MemoryChannel>) -> Boss {
        Boss::new(
            Arc::clone(channel) as Arc<dyn MessageChannel>,
            QueueNames::default(),
        )
        .with_poll_interval(Duration::from_millis(10))
    }

    fn response(url: &str, rc: i32) -> Response {
        let task = Task::new(url, None, None);
        Response::new(&task, rc, "out")
    }

    #[test]
    fn test_print_response_layout() {
        let text = PrintResponse::render(&Response {
            id: "a.com_x".to_string(),
            rc: 0,
            url: "http://a.com".to_string(),
            raw: "done".to_string(),
        });
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "http://a.com",
                "id",
                "a.com_x",
                "rc",
                "0",
                "url",
                "http://a.com",
                "raw",
                "done",
                &"-".repeat(80),
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_sets_pending_and_publishes_all() {
        let channel = Arc::new(MemoryChannel::new());
        let metrics = Metrics::new().expect("metrics");
        let mut boss = boss(&channel).with_metrics(metrics.clone());
        boss.add_tasks([
            Task::new("a.com", None, Some(5)),
            Task::new("b.com", None, Some(5)),
        ]);

        let sent = boss.dispatch().await.unwrap();

        assert_eq!(sent, 2);
        assert_eq!(boss.pending(), 2);
        assert!(boss.tasks().is_empty());
        assert_eq!(metrics.tasks_dispatched.get(), 2);

        let published = channel.peek_all("thug_ctrl").await;
        assert_eq!(published.len(), 2);
        // Last added goes out first.
        let first = Task::from_json(std::str::from_utf8(&published[0]).unwrap()).unwrap();
        assert_eq!(first.url, "http://b.com");
    }

    #[tokio::test]
    async fn test_collect_until_pending_zero() {
        let channel = Arc::new(MemoryChannel::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut boss = boss(&channel).with_handler(move |r: &Response| {
            sink.lock().unwrap().push(r.url.clone());
        });
        boss.add_tasks([Task::new("a.com", None, None)]);
        boss.dispatch().await.unwrap();

        let body = serde_json::to_vec(&response("a.com", 0)).unwrap();
        channel.publish("thug_resp", &body).await.unwrap();

        let summary = boss.collect().await.unwrap();
        assert_eq!(summary.handled, 1);
        assert_eq!(summary.pending, 0);
        assert!(!summary.deadline_elapsed);
        assert_eq!(*seen.lock().unwrap(), vec!["http://a.com".to_string()]);
    }

    #[tokio::test]
    async fn test_recover_requeues_claimed_response() {
        let channel = Arc::new(MemoryChannel::new());
        let body = serde_json::to_vec(&response("a.com", 0)).unwrap();
        channel.publish("thug_resp", &body).await.unwrap();
        // Claimed by a run that died before acknowledging.
        let claimed = channel.claim("thug_resp").await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(channel.message_count("thug_resp").await.unwrap(), 0);

        let mut boss = boss(&channel).with_handler(|_: &Response| {});
        assert_eq!(boss.recover().await.unwrap(), 1);
        assert_eq!(channel.message_count("thug_resp").await.unwrap(), 1);

        let summary = boss.collect().await.unwrap();
        assert_eq!(summary.handled, 1);
        assert_eq!(summary.pending, -1);
    }

    #[tokio::test]
    async fn test_collect_mops_up_strays_with_nothing_pending() {
        let channel = Arc::new(MemoryChannel::new());
        for url in ["old1.com", "old2.com"] {
            let body = serde_json::to_vec(&response(url, 0)).unwrap();
            channel.publish("thug_resp", &body).await.unwrap();
        }

        let mut boss = boss(&channel).with_handler(|_: &Response| {});
        let summary = boss.collect().await.unwrap();

        assert_eq!(summary.handled, 2);
        assert_eq!(summary.pending, -2);
        assert_eq!(channel.message_count("thug_resp").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_still_counts() {
        let channel = Arc::new(MemoryChannel::new());
        channel.publish("thug_resp", b"{ nope").await.unwrap();

        let mut boss = boss(&channel).with_handler(|_: &Response| {});
        boss.add_tasks([Task::new("a.com", None, None)]);
        boss.dispatch().await.unwrap();

        let summary = boss.collect().await.unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.handled, 0);
        assert_eq!(summary.pending, 0);
    }

    #[tokio::test]
    async fn test_collect_deadline_bounds_wait() {
        let channel = Arc::new(MemoryChannel::new());
        let mut boss = boss(&channel).with_deadline(Some(Duration::from_millis(50)));
        boss.add_tasks([Task::new("a.com", None, None)]);
        boss.dispatch().await.unwrap();

        let summary = boss.collect().await.unwrap();
        assert!(summary.deadline_elapsed);
        assert_eq!(summary.pending, 1);
    }

    #[tokio::test]
    async fn test_interrupt_stops_collection() {
        let channel = Arc::new(MemoryChannel::new());
        let (tx, rx) = broadcast::channel(1);
        let mut boss = boss(&channel).with_interrupt(rx);
        boss.add_tasks([Task::new("a.com", None, None)]);
        boss.dispatch().await.unwrap();

        tx.send(()).unwrap();
        let result = boss.collect().await;
        assert!(matches!(result, Err(BossError::Interrupted)));
    }

    #[tokio::test]
    async fn test_flush_drains_every_queue() {
        let channel = Arc::new(MemoryChannel::new());
        for queue in ["thug_ctrl", "thug_resp", "thug_skip"] {
            channel.publish(queue, b"x").await.unwrap();
        }
        channel.publish("thug_skip", b"y").await.unwrap();

        let drained = boss(&channel).flush().await.unwrap();
        assert_eq!(
            drained,
            vec![
                ("thug_ctrl".to_string(), 1),
                ("thug_resp".to_string(), 1),
                ("thug_skip".to_string(), 2),
            ]
        );
        for queue in ["thug_ctrl", "thug_resp", "thug_skip"] {
            assert!(channel.claim(queue).await.unwrap().is_none());
        }
    }
}
