//! 客户端协议事件
//!
//! 入站帧 `{"event": ..., "data": ...}` 解析为 [`InboundEvent`]，
//! 出站事件统一由 [`ServerEvent`] 表示。

use chrono::{DateTime, Utc};
use haven_core::error::{ErrorCode, HavenError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::models::LeadAction;

/// 原始入站帧
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|err| HavenError::validation(format!("malformed frame: {err}")))?;
        if frame.event.trim().is_empty() {
            return Err(HavenError::validation("event name must not be empty"));
        }
        Ok(frame)
    }

    pub fn is_pong(&self) -> bool {
        self.event == InboundEvent::PONG
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserInquiry {
    pub property_id: String,
    pub message: String,
    #[serde(default)]
    pub contact_method: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyStatusChange {
    pub property_id: String,
    pub status: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    pub recipient_id: String,
    pub content: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyRoom {
    pub property_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeadActivity {
    pub action: LeadAction,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// 类型化的入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    UserInquiry(UserInquiry),
    PropertyStatusChange(PropertyStatusChange),
    ChatMessage(ChatMessage),
    JoinProperty(PropertyRoom),
    LeaveProperty(PropertyRoom),
    LeadActivity(LeadActivity),
    Pong,
}

impl InboundEvent {
    pub const USER_INQUIRY: &'static str = "user_inquiry";
    pub const PROPERTY_STATUS_CHANGE: &'static str = "property_status_change";
    pub const CHAT_MESSAGE: &'static str = "chat_message";
    pub const JOIN_PROPERTY: &'static str = "join_property";
    pub const LEAVE_PROPERTY: &'static str = "leave_property";
    pub const LEAD_ACTIVITY: &'static str = "lead_activity";
    pub const PONG: &'static str = "pong";

    /// 已知的入站事件名，用于指标标签
    pub const NAMES: [&'static str; 7] = [
        Self::USER_INQUIRY,
        Self::PROPERTY_STATUS_CHANGE,
        Self::CHAT_MESSAGE,
        Self::JOIN_PROPERTY,
        Self::LEAVE_PROPERTY,
        Self::LEAD_ACTIVITY,
        Self::PONG,
    ];

    /// 解析并校验负载
    pub fn from_frame(frame: ClientFrame) -> Result<Self> {
        let data = frame.data.unwrap_or(Value::Null);
        let event = match frame.event.as_str() {
            Self::USER_INQUIRY => {
                let payload: UserInquiry = decode(&frame.event, data)?;
                require(&frame.event, "property_id", &payload.property_id)?;
                require(&frame.event, "message", &payload.message)?;
                InboundEvent::UserInquiry(payload)
            }
            Self::PROPERTY_STATUS_CHANGE => {
                let payload: PropertyStatusChange = decode(&frame.event, data)?;
                require(&frame.event, "property_id", &payload.property_id)?;
                require(&frame.event, "status", &payload.status)?;
                InboundEvent::PropertyStatusChange(payload)
            }
            Self::CHAT_MESSAGE => {
                let payload: ChatMessage = decode(&frame.event, data)?;
                require(&frame.event, "recipient_id", &payload.recipient_id)?;
                require(&frame.event, "content", &payload.content)?;
                InboundEvent::ChatMessage(payload)
            }
            Self::JOIN_PROPERTY => {
                let payload: PropertyRoom = decode(&frame.event, data)?;
                require(&frame.event, "property_id", &payload.property_id)?;
                InboundEvent::JoinProperty(payload)
            }
            Self::LEAVE_PROPERTY => {
                let payload: PropertyRoom = decode(&frame.event, data)?;
                require(&frame.event, "property_id", &payload.property_id)?;
                InboundEvent::LeaveProperty(payload)
            }
            Self::LEAD_ACTIVITY => InboundEvent::LeadActivity(decode(&frame.event, data)?),
            Self::PONG => InboundEvent::Pong,
            other => {
                return Err(HavenError::validation(format!("unknown event `{other}`")));
            }
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::UserInquiry(_) => Self::USER_INQUIRY,
            InboundEvent::PropertyStatusChange(_) => Self::PROPERTY_STATUS_CHANGE,
            InboundEvent::ChatMessage(_) => Self::CHAT_MESSAGE,
            InboundEvent::JoinProperty(_) => Self::JOIN_PROPERTY,
            InboundEvent::LeaveProperty(_) => Self::LEAVE_PROPERTY,
            InboundEvent::LeadActivity(_) => Self::LEAD_ACTIVITY,
            InboundEvent::Pong => Self::PONG,
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    if data.is_null() {
        return Err(HavenError::validation(format!("{event}: missing payload")));
    }
    serde_json::from_value(data).map_err(|err| HavenError::validation(format!("{event}: {err}")))
}

fn require(event: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HavenError::validation(format!(
            "{event}: `{field}` must not be empty"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInquiry {
    pub inquiry_id: String,
    pub property_id: String,
    pub from_user_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_date: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InquiryReceived {
    pub inquiry_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdated {
    pub property_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    pub updated_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDelivery {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub message_type: String,
    /// 系统自动回复
    #[serde(default)]
    pub automated: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSent {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedDelivery {
    pub id: String,
    pub event: String,
    pub data: Value,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadActivityNotice {
    pub activity_id: String,
    pub user_id: String,
    pub action: LeadAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub weight: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub reason: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl ErrorNotice {
    pub fn from_error(err: &HavenError, event: Option<&str>) -> Self {
        Self {
            reason: err.code(),
            message: err.client_message(),
            event: event.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: DateTime<Utc>,
}

/// 出站事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewInquiry(NewInquiry),
    InquiryReceived(InquiryReceived),
    PropertyUpdated(PropertyUpdated),
    ChatMessage(ChatDelivery),
    MessageSent(MessageSent),
    Notification(super::models::Notification),
    QueuedMessage(QueuedDelivery),
    LeadActivity(LeadActivityNotice),
    Error(ErrorNotice),
    Ping(Ping),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewInquiry(_) => "new_inquiry",
            ServerEvent::InquiryReceived(_) => "inquiry_received",
            ServerEvent::PropertyUpdated(_) => "property_updated",
            ServerEvent::ChatMessage(_) => "chat_message",
            ServerEvent::MessageSent(_) => "message_sent",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::QueuedMessage(_) => "queued_message",
            ServerEvent::LeadActivity(_) => "lead_activity",
            ServerEvent::Error(_) => "error",
            ServerEvent::Ping(_) => "ping",
        }
    }

    pub fn error(err: &HavenError, event: Option<&str>) -> Self {
        ServerEvent::Error(ErrorNotice::from_error(err, event))
    }

    pub fn ping(timestamp: DateTime<Utc>) -> Self {
        ServerEvent::Ping(Ping { timestamp })
    }

    /// 拆分为事件名与负载
    pub fn to_parts(&self) -> Result<(String, Value)> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| HavenError::Internal(format!("encode {}: {err}", self.name())))?;
        let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        Ok((self.name().to_string(), data))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| HavenError::Internal(format!("encode {}: {err}", self.name())))
    }
}

/// 写入连接发送队列的帧
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerEvent),
    /// 服务端主动关闭连接
    Close { reason: String },
}
