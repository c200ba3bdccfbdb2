use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use haven_core::error::Result;

use super::events::ServerEvent;
use super::models::{
    ActivityEvent, AgentRef, ChatMessageRecord, DrainedMessages, InquiryRecord, LeadAction,
    LeadActivityRecord, Notification, Principal, PropertyStatusRecord, QueuedMessage,
};

/// 握手凭证校验
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Principal>;
}

/// 业务记录持久化（由外部 CRUD 层拥有数据结构）
#[async_trait]
pub trait EventPersistence: Send + Sync {
    async fn save_inquiry(&self, record: &InquiryRecord) -> Result<()>;
    async fn save_chat_message(&self, record: &ChatMessageRecord) -> Result<()>;
    async fn save_lead_activity(&self, record: &LeadActivityRecord) -> Result<()>;
    async fn save_property_status(&self, record: &PropertyStatusRecord) -> Result<()>;
    async fn find_property_status(&self, property_id: &str)
    -> Result<Option<PropertyStatusRecord>>;
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn find_available_agent(&self, property_id: &str) -> Result<Option<AgentRef>>;
}

/// 通知关注过某房源的用户
#[async_trait]
pub trait InterestNotifier: Send + Sync {
    async fn notify(&self, property_id: &str, notification: &Notification) -> Result<()>;
}

#[async_trait]
pub trait LeadScorer: Send + Sync {
    /// 返回更新后的累计得分
    async fn update_score(&self, user_id: &str, action: LeadAction) -> Result<i64>;
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, event: ActivityEvent) -> Result<()>;
}

/// 离线消息队列
///
/// 每个接收人一条 FIFO 队列；`drain` 原子地取出并清空整条队列。
#[async_trait]
pub trait OfflineMessageQueue: Send + Sync {
    async fn enqueue(
        &self,
        recipient_id: &str,
        event: &ServerEvent,
        ttl: Duration,
    ) -> Result<QueuedMessage>;

    async fn drain(&self, recipient_id: &str) -> Result<DrainedMessages>;
}

pub type AuthenticatorRef = Arc<dyn Authenticator>;
pub type EventPersistenceRef = Arc<dyn EventPersistence>;
pub type AgentDirectoryRef = Arc<dyn AgentDirectory>;
pub type InterestNotifierRef = Arc<dyn InterestNotifier>;
pub type LeadScorerRef = Arc<dyn LeadScorer>;
pub type AnalyticsSinkRef = Arc<dyn AnalyticsSink>;
pub type OfflineMessageQueueRef = Arc<dyn OfflineMessageQueue>;
