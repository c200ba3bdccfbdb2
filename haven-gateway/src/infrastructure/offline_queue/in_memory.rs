use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use haven_core::error::Result;
use tokio::sync::Mutex;

use crate::domain::events::ServerEvent;
use crate::domain::models::{DrainedMessages, QueuedMessage};
use crate::domain::repositories::OfflineMessageQueue;

/// 进程内离线队列（开发模式与测试）
#[derive(Default, Clone)]
pub struct InMemoryOfflineQueue {
    inner: Arc<Mutex<HashMap<String, VecDeque<QueuedMessage>>>>,
}

impl InMemoryOfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue_at(
        &self,
        recipient_id: &str,
        event: &ServerEvent,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage> {
        let message = QueuedMessage::new(recipient_id, event, ttl, now)?;
        let mut guard = self.inner.lock().await;
        guard
            .entry(recipient_id.to_string())
            .or_default()
            .push_back(message.clone());
        Ok(message)
    }

    pub async fn drain_at(&self, recipient_id: &str, now: DateTime<Utc>) -> DrainedMessages {
        let queued = {
            let mut guard = self.inner.lock().await;
            guard.remove(recipient_id).unwrap_or_default()
        };
        DrainedMessages::partition(queued.into_iter().collect(), now)
    }

    pub async fn len(&self, recipient_id: &str) -> usize {
        let guard = self.inner.lock().await;
        guard.get(recipient_id).map(VecDeque::len).unwrap_or(0)
    }

    /// 查看队列内容但不取出
    pub async fn peek(&self, recipient_id: &str) -> Vec<QueuedMessage> {
        let guard = self.inner.lock().await;
        guard
            .get(recipient_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OfflineMessageQueue for InMemoryOfflineQueue {
    async fn enqueue(
        &self,
        recipient_id: &str,
        event: &ServerEvent,
        ttl: Duration,
    ) -> Result<QueuedMessage> {
        self.enqueue_at(recipient_id, event, ttl, Utc::now()).await
    }

    async fn drain(&self, recipient_id: &str) -> Result<DrainedMessages> {
        Ok(self.drain_at(recipient_id, Utc::now()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::MessageSent;

    fn event(id: &str) -> ServerEvent {
        ServerEvent::MessageSent(MessageSent {
            message_id: id.to_string(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_drain_returns_fifo_and_clears() {
        let queue = InMemoryOfflineQueue::new();
        let ttl = Duration::hours(24);
        for i in 0..5 {
            queue
                .enqueue("agent-1", &event(&format!("m{i}")), ttl)
                .await
                .unwrap();
        }

        let drained = queue.drain("agent-1").await.unwrap();
        let ids: Vec<_> = drained
            .messages
            .iter()
            .map(|m| m.data["message_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(drained.expired, 0);
        assert_eq!(queue.len("agent-1").await, 0);
        assert!(queue.drain("agent-1").await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_expired_messages_are_dropped() {
        let queue = InMemoryOfflineQueue::new();
        let t0 = Utc::now();
        let ttl = Duration::seconds(30);
        queue.enqueue_at("u1", &event("old"), ttl, t0).await.unwrap();
        queue
            .enqueue_at("u1", &event("new"), ttl, t0 + Duration::seconds(20))
            .await
            .unwrap();

        // old 在 t0+30 到期，new 在 t0+50 到期
        let drained = queue.drain_at("u1", t0 + Duration::seconds(31)).await;
        assert_eq!(drained.expired, 1);
        assert_eq!(drained.messages.len(), 1);
        assert_eq!(drained.messages[0].data["message_id"], "new");
    }

    #[tokio::test]
    async fn test_drain_at_exact_expiry_includes_message() {
        let queue = InMemoryOfflineQueue::new();
        let t0 = Utc::now();
        queue
            .enqueue_at("u1", &event("edge"), Duration::seconds(10), t0)
            .await
            .unwrap();
        let drained = queue.drain_at("u1", t0 + Duration::seconds(10)).await;
        assert_eq!(drained.messages.len(), 1);
    }
}
