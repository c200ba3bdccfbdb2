//! 网关领域模型
//!
//! 连接、主题、离线消息与持久化记录等核心实体。

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use haven_core::error::{HavenError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{QueuedDelivery, ServerEvent};

/// 用户角色
///
/// 未知或缺失的角色一律视为 `Guest`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Agent,
    Tenant,
    Guest,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "agent" => Role::Agent,
            "tenant" => Role::Tenant,
            _ => Role::Guest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
            Role::Tenant => "tenant",
            Role::Guest => "guest",
        }
    }

    /// 管理员与经纪人拥有房源状态变更和线索订阅权限
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Agent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已认证的主体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// 连接元数据快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity_at
    }
}

/// 单个连接的生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

impl ConnectionPhase {
    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Disconnected)
                | (Authenticated, Active)
                | (Authenticated, Disconnected)
                | (Active, Active)
                | (Active, Disconnected)
        )
    }

    /// 推进到下一阶段，非法迁移返回内部错误且保持原状态
    pub fn advance(&mut self, next: ConnectionPhase) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(HavenError::Internal(format!(
                "illegal connection transition {:?} -> {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

/// 广播主题
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub const NOTIFICATIONS: &'static str = "notifications";
    pub const MARKET_UPDATES: &'static str = "market_updates";
    pub const PROPERTY_UPDATES: &'static str = "property_updates";
    pub const LEAD_ACTIVITY: &'static str = "lead_activity";

    pub fn named(name: impl Into<String>) -> Self {
        Topic(name.into())
    }

    pub fn notifications() -> Self {
        Topic::named(Self::NOTIFICATIONS)
    }

    pub fn market_updates() -> Self {
        Topic::named(Self::MARKET_UPDATES)
    }

    pub fn property_updates() -> Self {
        Topic::named(Self::PROPERTY_UPDATES)
    }

    pub fn lead_activity() -> Self {
        Topic::named(Self::LEAD_ACTIVITY)
    }

    /// 用户私有房间 `user_<id>`
    pub fn user(user_id: &str) -> Self {
        Topic(format!("user_{user_id}"))
    }

    /// 房源房间 `property_<id>`
    pub fn property(property_id: &str) -> Self {
        Topic(format!("property_{property_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 离线消息信封
///
/// `event`/`data` 为原始出站事件的名称和负载，队列本身不解释其内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub recipient_id: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(
        recipient_id: &str,
        event: &ServerEvent,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            HavenError::validation(format!("offline ttl of {}s is out of range", ttl.num_seconds()))
        })?;
        let (name, data) = event.to_parts()?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            event: name,
            data,
            enqueued_at: now,
            expires_at,
        })
    }

    /// 过期时刻本身仍可投递
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn into_delivery(self) -> ServerEvent {
        ServerEvent::QueuedMessage(QueuedDelivery {
            id: self.id,
            event: self.event,
            data: self.data,
            enqueued_at: self.enqueued_at,
        })
    }
}

/// 一次离线队列提取的结果
#[derive(Debug, Default)]
pub struct DrainedMessages {
    /// 按入队顺序排列的未过期消息
    pub messages: Vec<QueuedMessage>,
    /// 已过期被丢弃的数量
    pub expired: usize,
}

impl DrainedMessages {
    /// 按时间过滤过期消息，保持原有顺序
    pub fn partition(all: Vec<QueuedMessage>, now: DateTime<Utc>) -> Self {
        let total = all.len();
        let messages: Vec<QueuedMessage> =
            all.into_iter().filter(|m| !m.is_expired_at(now)).collect();
        let expired = total - messages.len();
        Self { messages, expired }
    }
}

/// 线索行为类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadAction {
    View,
    Save,
    Share,
    Inquiry,
    ScheduleTour,
    Contact,
}

impl LeadAction {
    /// 线索评分权重
    pub fn weight(&self) -> i64 {
        match self {
            LeadAction::View => 1,
            LeadAction::Save => 3,
            LeadAction::Share => 2,
            LeadAction::Inquiry => 5,
            LeadAction::ScheduleTour => 8,
            LeadAction::Contact => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadAction::View => "view",
            LeadAction::Save => "save",
            LeadAction::Share => "share",
            LeadAction::Inquiry => "inquiry",
            LeadAction::ScheduleTour => "schedule_tour",
            LeadAction::Contact => "contact",
        }
    }
}

/// 经纪人目录查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    pub id: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InquiryRecord {
    pub id: String,
    pub user_id: String,
    pub property_id: String,
    pub message: String,
    pub contact_method: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub preferred_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub property_id: Option<String>,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadActivityRecord {
    pub id: String,
    pub user_id: String,
    pub action: LeadAction,
    pub property_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyStatusRecord {
    pub property_id: String,
    pub status: String,
    pub previous_status: Option<String>,
    pub updated_by: String,
    pub details: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// 推送给关注者的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 分析埋点事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: String,
    pub kind: String,
    pub property_id: Option<String>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
