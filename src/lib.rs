//! thugd: distributed URL analysis over a durable task queue.
//!
//! A boss publishes analysis tasks, thuglet workers claim them one at a time
//! and run the analyzer under a time bound, and the boss collects the
//! responses. Timed-out and failed tasks are diverted to a skip queue.

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod scheduler;
pub mod utils;

// Re-export commonly used error types
pub use error::{BossError, ChannelError, ConfigError, ExecError, TaskError};
