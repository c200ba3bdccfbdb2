use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use haven_core::error::{InfraResult, InfraResultExt, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::domain::events::ServerEvent;
use crate::domain::models::{DrainedMessages, QueuedMessage};
use crate::domain::repositories::OfflineMessageQueue;

const OFFLINE_PREFIX: &str = "offline:";

/// RPUSH 后只延长键的过期时间，返回写入前的 PTTL
///
/// KEYS[1] 队列键，ARGV[1] 消息，ARGV[2] 过期毫秒数
const PUSH_EXTEND_TTL: &str = r#"
redis.call('RPUSH', KEYS[1], ARGV[1])
local current = redis.call('PTTL', KEYS[1])
local requested = tonumber(ARGV[2])
if current < requested then
    redis.call('PEXPIRE', KEYS[1], requested)
end
return current
"#;

/// Redis 离线队列
///
/// 每个接收人一个 LIST：RPUSH 入队并只延长键的 TTL，LRANGE + DEL 在 MULTI 中原子取出。
pub struct RedisOfflineQueue {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisOfflineQueue {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn queue_key(&self, recipient_id: &str) -> String {
        format!("{}:{}{}", self.namespace, OFFLINE_PREFIX, recipient_id)
    }

    async fn push(&self, message: &QueuedMessage, ttl: Duration) -> InfraResult<()> {
        let key = self.queue_key(&message.recipient_id);
        let payload = serde_json::to_string(message).context("encode queued message")?;
        let ttl_millis = ttl.num_milliseconds().max(1_000);
        let mut conn = self.conn.clone();

        // 键的 TTL 取所有消息中最长的，单条消息是否过期由 expires_at 判定
        let _previous_ttl: i64 = redis::Script::new(PUSH_EXTEND_TTL)
            .key(&key)
            .arg(payload)
            .arg(ttl_millis)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("rpush {key}"))?;
        Ok(())
    }

    async fn take_all(&self, recipient_id: &str) -> InfraResult<Vec<String>> {
        let key = self.queue_key(recipient_id);
        let mut conn = self.conn.clone();
        let (payloads, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("drain {key}"))?;
        Ok(payloads)
    }

    /// 队列长度，仅用于运维排查
    pub async fn len(&self, recipient_id: &str) -> Result<usize> {
        let key = self.queue_key(recipient_id);
        let mut conn = self.conn.clone();
        let len: InfraResult<usize> = conn
            .llen(&key)
            .await
            .with_context(|| format!("llen {key}"));
        len.into_collaborator("offline_queue")
    }
}

#[async_trait]
impl OfflineMessageQueue for RedisOfflineQueue {
    async fn enqueue(
        &self,
        recipient_id: &str,
        event: &ServerEvent,
        ttl: Duration,
    ) -> Result<QueuedMessage> {
        let message = QueuedMessage::new(recipient_id, event, ttl, Utc::now())?;
        self.push(&message, ttl)
            .await
            .into_collaborator("offline_queue")?;
        Ok(message)
    }

    async fn drain(&self, recipient_id: &str) -> Result<DrainedMessages> {
        let payloads = self
            .take_all(recipient_id)
            .await
            .into_collaborator("offline_queue")?;

        let mut messages = Vec::with_capacity(payloads.len());
        for raw in payloads {
            match serde_json::from_str::<QueuedMessage>(&raw) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    warn!(recipient_id = %recipient_id, error = %err, "dropping malformed queued message");
                }
            }
        }

        Ok(DrainedMessages::partition(messages, Utc::now()))
    }
}
