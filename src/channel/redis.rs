//! Redis-backed message channel.
//!
//! Each queue is a Redis list. Claims use the reliable-queue pattern:
//!
//! - `{queue}`: ready messages, published with LPUSH and claimed from the right
//! - `{queue}:processing:{consumer}`: messages this consumer has claimed but
//!   not yet acknowledged
//!
//! A claim atomically moves one message from the queue into the consumer's
//! processing list (RPOPLPUSH / BRPOPLPUSH); acknowledging removes it from
//! there (LREM). If the consumer dies, its processing list survives and is
//! moved back by [`MessageChannel::recover`] when a consumer with the same
//! name starts again.
//!
//! Every consumer needs a distinct name: two live processes sharing one
//! would acknowledge and recover each other's claims.
//!
//! # Durability
//!
//! Messages are as durable as the Redis server is configured to be. Run the
//! broker with `appendonly yes` so queued tasks survive a restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Delivery, MessageChannel};
use crate::error::ChannelError;

/// Message channel over a Redis server.
pub struct RedisChannel {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name under which this process holds its unacknowledged claims.
    consumer: String,
    next_tag: AtomicU64,
}

impl RedisChannel {
    /// Connects to Redis once.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, consumer: &str) -> Result<Self, ChannelError> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, consumer))
    }

    /// Connects to Redis, retrying forever with a fixed delay.
    ///
    /// An unparseable URL is still returned as an error, since retrying
    /// cannot fix it.
    pub async fn connect_with_retry(
        redis_url: &str,
        consumer: &str,
        delay: Duration,
    ) -> Result<Self, ChannelError> {
        ::redis::Client::open(redis_url)
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let mut attempt: u64 = 1;
        loop {
            match Self::connect(redis_url, consumer).await {
                Ok(channel) => {
                    info!(url = %redis_url, consumer = %consumer, attempt, "Connected to broker");
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(
                        url = %redis_url,
                        attempt,
                        error = %e,
                        "Failed to connect to broker, trying again"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Creates a channel from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, consumer: &str) -> Self {
        Self {
            redis,
            consumer: consumer.to_string(),
            next_tag: AtomicU64::new(0),
        }
    }

    /// Name of this consumer.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Key of this consumer's processing list for `queue`.
    pub fn processing_key(&self, queue: &str) -> String {
        format!("{}:processing:{}", queue, self.consumer)
    }

    fn delivery(&self, queue: &str, body: Vec<u8>) -> Delivery {
        Delivery {
            queue: queue.to_string(),
            tag: self.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
            body,
        }
    }
}

#[async_trait]
impl MessageChannel for RedisChannel {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(queue, body).await?;
        Ok(())
    }

    async fn claim(&self, queue: &str) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.redis.clone();

        let body: Option<Vec<u8>> = ::redis::cmd("RPOPLPUSH")
            .arg(queue)
            .arg(self.processing_key(queue))
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| self.delivery(queue, body)))
    }

    async fn claim_wait(
        &self,
        queue: &str,
        wait: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.redis.clone();
        let timeout_secs = wait.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let body: Option<Vec<u8>> = ::redis::cmd("BRPOPLPUSH")
            .arg(queue)
            .arg(self.processing_key(queue))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| self.delivery(queue, body)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn
            .lrem(self.processing_key(&delivery.queue), 1, delivery.body.as_slice())
            .await?;

        if removed == 0 {
            return Err(ChannelError::UnknownDelivery {
                queue: delivery.queue.clone(),
                tag: delivery.tag,
            });
        }
        Ok(())
    }

    async fn message_count(&self, queue: &str) -> Result<usize, ChannelError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }

    async fn recover(&self, queue: &str) -> Result<usize, ChannelError> {
        let mut conn = self.redis.clone();
        let processing = self.processing_key(queue);
        let mut recovered = 0;

        // Recovered messages rejoin at the tail; queue order is not part of
        // the delivery contract.
        loop {
            let moved: Option<Vec<u8>> = ::redis::cmd("RPOPLPUSH")
                .arg(&processing)
                .arg(queue)
                .query_async(&mut conn)
                .await?;

            match moved {
                Some(_) => recovered += 1,
                None => break,
            }
        }

        if recovered > 0 {
            info!(queue = %queue, consumer = %self.consumer, recovered, "Recovered unacknowledged messages");
        } else {
            debug!(queue = %queue, consumer = %self.consumer, "No unacknowledged messages to recover");
        }
        Ok(recovered)
    }
}
