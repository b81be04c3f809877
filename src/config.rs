//! Configuration shared by the boss and the thuglet workers.
//!
//! Loaded from a YAML file. Every field has a default, so an empty file (or
//! no file at all) yields a working local setup against `redis://127.0.0.1:6379`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Default per-task execution bound (30 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 1800;

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Broker connection and queue names.
    pub broker: BrokerConfig,
    /// Worker-only settings.
    pub worker: WorkerConfig,
}

impl DaemonConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads configuration from a YAML file, falling back to defaults when
    /// the file does not exist. A file that exists but fails to parse is
    /// still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Redis connection URL.
    pub url: String,
    /// Queue the boss publishes tasks to.
    pub task_queue: String,
    /// Queue thuglets publish responses to.
    pub resp_queue: String,
    /// Queue for timed-out and failed task messages.
    pub skip_queue: String,
    /// Fixed delay between connection attempts.
    pub retry_delay_secs: u64,
    /// Consumer name for the boss's response claims. Kept stable across runs
    /// so a restarted boss recovers responses a crashed one had claimed.
    pub boss_consumer: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            task_queue: "thug_ctrl".to_string(),
            resp_queue: "thug_resp".to_string(),
            skip_queue: "thug_skip".to_string(),
            retry_delay_secs: 3,
            boss_consumer: "thugboss".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Returns the reconnect delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Returns the three queue names.
    pub fn queues(&self) -> QueueNames {
        QueueNames {
            task: self.task_queue.clone(),
            resp: self.resp_queue.clone(),
            skip: self.skip_queue.clone(),
        }
    }
}

/// Names of the task, response and skip queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub task: String,
    pub resp: String,
    pub skip: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        BrokerConfig::default().queues()
    }
}

impl QueueNames {
    /// All three queues, in flush order.
    pub fn all(&self) -> [&str; 3] {
        [&self.task, &self.resp, &self.skip]
    }
}

/// Thuglet settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Analysis binary invoked for each task.
    pub binary: String,
    /// Execution bound for tasks that carry no timeout of their own.
    pub default_timeout_secs: u64,
    /// Supervision poll interval, also used as the empty-queue wait.
    pub poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL for a timed-out process.
    pub kill_grace_secs: u64,
    /// Delay before the first connection attempt.
    pub startup_delay_secs: u64,
    /// Consumer name used for this worker's unacknowledged claims.
    pub consumer: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: "thug".to_string(),
            default_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            poll_interval_ms: 1000,
            kill_grace_secs: 10,
            startup_delay_secs: 5,
            consumer: None,
        }
    }
}

impl WorkerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Resolves the consumer name: configured value, then `$HOSTNAME`, then
    /// a random `thuglet-<uuid>`.
    ///
    /// A stable name lets a restarted worker recover the claim it held when
    /// it died; a random one never recovers anything.
    pub fn consumer_name(&self) -> String {
        if let Some(ref name) = self.consumer {
            return name.clone();
        }
        match std::env::var("HOSTNAME") {
            Ok(host) if !host.trim().is_empty() => host,
            _ => format!("thuglet-{}", uuid::Uuid::new_v4()),
        }
    }
}
