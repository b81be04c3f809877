//! Error types for thugd operations.
//!
//! One error enum per subsystem:
//! - Message channel (broker I/O and connection)
//! - Task building and wire decoding
//! - Analysis subprocess execution
//! - Configuration loading
//! - Boss dispatch, collection and flush

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to the message broker.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to connect to the broker.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The delivery being acknowledged is unknown to the channel.
    #[error("Delivery {tag} on queue '{queue}' is not outstanding")]
    UnknownDelivery { queue: String, tag: u64 },
}

/// Errors that can occur while building or decoding tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Malformed task message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while running the analysis command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to launch '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to supervise process: {0}")]
    Wait(#[from] std::io::Error),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors surfaced by the boss.
#[derive(Debug, Error)]
pub enum BossError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interrupted by operator")]
    Interrupted,
}
