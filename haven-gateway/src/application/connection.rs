//! 连接生命周期服务
//!
//! 接入：注册 -> 默认订阅 -> 投递离线消息；断开：注销 -> 退订 -> 延迟清理限流窗口。

use std::sync::Arc;
use std::time::Duration;

use haven_core::error::Result;
use haven_core::metrics::GatewayMetrics;
use tracing::{debug, info, warn};

use crate::domain::models::{ConnectionInfo, Principal};
use crate::domain::repositories::OfflineMessageQueueRef;
use crate::domain::service::{
    ConnectionRegistry, OutboundReceiver, OutboundSender, RateLimiter, TopicRouter,
    outbound_channel,
};

pub struct ConnectionService {
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    router: Arc<TopicRouter>,
    offline_queue: OfflineMessageQueueRef,
    forget_delay: Duration,
    outbound_capacity: usize,
    metrics: Arc<GatewayMetrics>,
}

impl ConnectionService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        router: Arc<TopicRouter>,
        offline_queue: OfflineMessageQueueRef,
        forget_delay: Duration,
        outbound_capacity: usize,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            limiter,
            router,
            offline_queue,
            forget_delay,
            outbound_capacity,
            metrics,
        }
    }

    /// 为新连接创建出站通道
    pub fn channel(&self) -> (OutboundSender, OutboundReceiver) {
        outbound_channel(self.outbound_capacity)
    }

    /// 接入已认证的连接
    pub async fn admit(
        &self,
        session_id: &str,
        principal: &Principal,
        sender: OutboundSender,
    ) -> Result<ConnectionInfo> {
        let info = self.registry.register(session_id, principal, sender)?;
        let topics = self.router.subscribe_defaults(session_id, principal).await;

        self.metrics.connections_total.inc();
        self.metrics.active_connections.set(self.registry.len() as i64);

        info!(
            session_id = %session_id,
            user_id = %principal.user_id,
            role = %principal.role,
            topics = topics.len(),
            "connection admitted"
        );

        self.deliver_offline(session_id, &principal.user_id).await;
        Ok(info)
    }

    /// 投递离线消息（入队顺序）
    async fn deliver_offline(&self, session_id: &str, user_id: &str) {
        let drained = match self.offline_queue.drain(user_id).await {
            Ok(drained) => drained,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "failed to drain offline queue");
                return;
            }
        };

        if drained.expired > 0 {
            self.metrics.offline_expired_total.inc_by(drained.expired as u64);
            debug!(user_id = %user_id, expired = drained.expired, "discarded expired offline messages");
        }

        let total = drained.messages.len();
        let mut delivered = 0u64;
        for message in drained.messages {
            if self.registry.send_event(session_id, message.into_delivery()) {
                delivered += 1;
            }
        }
        if delivered > 0 {
            self.metrics.offline_delivered_total.inc_by(delivered);
        }
        if total > 0 {
            info!(user_id = %user_id, delivered, total, "offline messages delivered");
        }
        if (delivered as usize) < total {
            warn!(user_id = %user_id, dropped = total - delivered as usize, "offline messages exceeded outbound queue");
        }
    }

    /// 断开连接，重复调用无副作用
    pub async fn disconnect(&self, session_id: &str, reason: &str) -> Option<ConnectionInfo> {
        // 先注销：之后的 join 会看到连接已不存在
        let removed = self.registry.unregister(session_id);
        let topics = self.router.drop_session(session_id).await;
        let removed = removed?;

        self.metrics.active_connections.set(self.registry.len() as i64);
        info!(
            session_id = %session_id,
            user_id = %removed.user_id,
            topics,
            reason = %reason,
            "connection closed"
        );

        self.schedule_forget(removed.user_id.clone());
        Some(removed)
    }

    /// 延迟释放限流窗口；期间用户重连则保留
    fn schedule_forget(&self, user_id: String) {
        let registry = Arc::clone(&self.registry);
        let limiter = Arc::clone(&self.limiter);
        let delay = self.forget_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.is_online(&user_id) {
                return;
            }
            limiter.forget(&user_id);
            debug!(user_id = %user_id, "rate limit window released");
        });
    }
}
