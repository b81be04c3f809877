//! In-process message channel.
//!
//! Mirrors the broker semantics closely enough to drive the boss and the
//! thuglet end to end without a Redis server: FIFO ready lists, claims held
//! aside until acknowledged, and recovery of unacknowledged claims.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, MessageChannel};
use crate::error::ChannelError;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
}

/// Message channel backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
    published: Notify,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claimed but unacknowledged messages on a queue.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }

    /// Copies of the ready messages on a queue, oldest first.
    pub async fn peek_all(&self, queue: &str) -> Vec<Vec<u8>> {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), ChannelError> {
        {
            let mut queues = self.queues.lock().await;
            queues
                .entry(queue.to_string())
                .or_default()
                .ready
                .push_back(body.to_vec());
        }
        self.published.notify_waiters();
        Ok(())
    }

    async fn claim(&self, queue: &str) -> Result<Option<Delivery>, ChannelError> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some(body) = state.ready.pop_front() else {
            return Ok(None);
        };

        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        state.unacked.insert(tag, body.clone());

        Ok(Some(Delivery {
            queue: queue.to_string(),
            tag,
            body,
        }))
    }

    async fn claim_wait(
        &self,
        queue: &str,
        wait: std::time::Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        let notified = self.published.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(delivery) = self.claim(queue).await? {
            return Ok(Some(delivery));
        }

        // Woken by any publish; the claim below decides whether it was ours.
        let _ = tokio::time::timeout(wait, notified).await;
        self.claim(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut queues = self.queues.lock().await;
        let removed = queues
            .get_mut(&delivery.queue)
            .and_then(|state| state.unacked.remove(&delivery.tag));

        match removed {
            Some(_) => Ok(()),
            None => Err(ChannelError::UnknownDelivery {
                queue: delivery.queue.clone(),
                tag: delivery.tag,
            }),
        }
    }

    async fn message_count(&self, queue: &str) -> Result<usize, ChannelError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map(|q| q.ready.len()).unwrap_or(0))
    }

    async fn recover(&self, queue: &str) -> Result<usize, ChannelError> {
        let recovered = {
            let mut queues = self.queues.lock().await;
            let Some(state) = queues.get_mut(queue) else {
                return Ok(0);
            };

            let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
            tags.sort_unstable();
            // Oldest claim ends up at the head of the queue.
            for tag in tags.iter().rev() {
                if let Some(body) = state.unacked.remove(tag) {
                    state.ready.push_front(body);
                }
            }
            tags.len()
        };

        if recovered > 0 {
            self.published.notify_waiters();
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_claim_is_fifo_and_invisible_until_ack() {
        let channel = MemoryChannel::new();
        channel.publish("q", b"first").await.unwrap();
        channel.publish("q", b"second").await.unwrap();

        let first = channel.claim("q").await.unwrap().expect("message");
        assert_eq!(first.body, b"first");
        assert_eq!(channel.message_count("q").await.unwrap(), 1);
        assert_eq!(channel.unacked_count("q").await, 1);

        channel.ack(&first).await.unwrap();
        assert_eq!(channel.unacked_count("q").await, 0);

        let second = channel.claim("q").await.unwrap().expect("message");
        assert_eq!(second.body, b"second");
        assert_ne!(first.tag, second.tag);
    }

    #[tokio::test]
    async fn test_double_ack_is_rejected() {
        let channel = MemoryChannel::new();
        channel.publish("q", b"x").await.unwrap();
        let delivery = channel.claim("q").await.unwrap().expect("message");

        channel.ack(&delivery).await.unwrap();
        let err = channel.ack(&delivery).await;
        assert!(matches!(err, Err(ChannelError::UnknownDelivery { .. })));
    }

    #[tokio::test]
    async fn test_empty_and_unknown_queues() {
        let channel = MemoryChannel::new();
        assert!(channel.claim("nothing").await.unwrap().is_none());
        assert_eq!(channel.message_count("nothing").await.unwrap(), 0);
        assert_eq!(channel.recover("nothing").await.unwrap(), 0);
        assert!(channel.consume_one("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_requeues_unacked_in_claim_order() {
        let channel = MemoryChannel::new();
        for body in [b"a", b"b", b"c"] {
            channel.publish("q", body).await.unwrap();
        }
        let _a = channel.claim("q").await.unwrap();
        let _b = channel.claim("q").await.unwrap();

        assert_eq!(channel.recover("q").await.unwrap(), 2);
        assert_eq!(
            channel.peek_all("q").await,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(channel.unacked_count("q").await, 0);
    }

    #[tokio::test]
    async fn test_consume_one_acks() {
        let channel = MemoryChannel::new();
        channel.publish("q", b"body").await.unwrap();

        let body = channel.consume_one("q").await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"body"[..]));
        assert_eq!(channel.unacked_count("q").await, 0);
        assert_eq!(channel.message_count("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_wait_wakes_on_publish() {
        let channel = Arc::new(MemoryChannel::new());

        let publisher = Arc::clone(&channel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.publish("q", b"late").await.unwrap();
        });

        let delivery = channel
            .claim_wait("q", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("woken by publish");
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_claim_wait_times_out_empty() {
        let channel = MemoryChannel::new();
        let result = channel
            .claim_wait("q", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
