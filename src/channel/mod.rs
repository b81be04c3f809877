//! Durable point-to-point message channel.
//!
//! The boss and the thuglets never talk to each other directly; every
//! interaction goes through three named queues on a broker:
//!
//! ```text
//!   boss ──publish──▶ [task] ──claim──▶ thuglet ──publish──▶ [resp] ──claim──▶ boss
//!                                          │
//!                                          └──publish──▶ [skip]
//! ```
//!
//! # Delivery model
//!
//! - **At-least-once**: a claimed message stays on the broker, invisible to
//!   other consumers, until it is acknowledged. A consumer that dies before
//!   acknowledging gets its claims back through [`MessageChannel::recover`].
//! - **Durable**: publishes go to broker storage that survives a restart.
//! - **One claim at a time**: callers claim a single message and acknowledge
//!   it before claiming the next; nothing in the trait prefetches.
//!
//! Implementations:
//! - [`RedisChannel`]: Redis lists with per-consumer processing lists.
//! - [`MemoryChannel`]: in-process, same semantics, for tests and embedding.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelError;

pub use self::memory::MemoryChannel;
pub use self::redis::RedisChannel;

/// A claimed, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was claimed from.
    pub queue: String,
    /// Channel-assigned tag identifying this claim.
    pub tag: u64,
    /// The message body, byte-for-byte as published.
    pub body: Vec<u8>,
}

/// Publish, claim and acknowledge messages on named queues.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Durably appends a message to a queue.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), ChannelError>;

    /// Claims one message without waiting. `Ok(None)` means the queue is empty.
    async fn claim(&self, queue: &str) -> Result<Option<Delivery>, ChannelError>;

    /// Claims one message, waiting up to `wait` for one to arrive.
    async fn claim_wait(
        &self,
        queue: &str,
        wait: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        if let Some(delivery) = self.claim(queue).await? {
            return Ok(Some(delivery));
        }
        tokio::time::sleep(wait).await;
        self.claim(queue).await
    }

    /// Removes a claimed message from its queue for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Number of messages ready to be claimed.
    async fn message_count(&self, queue: &str) -> Result<usize, ChannelError>;

    /// Returns this consumer's unacknowledged claims on `queue` to the queue.
    /// Returns how many messages were put back.
    async fn recover(&self, queue: &str) -> Result<usize, ChannelError>;

    /// Claims and immediately acknowledges one message, returning its body.
    async fn consume_one(&self, queue: &str) -> Result<Option<Vec<u8>>, ChannelError> {
        match self.claim(queue).await? {
            Some(delivery) => {
                self.ack(&delivery).await?;
                Ok(Some(delivery.body))
            }
            None => Ok(None),
        }
    }
}
