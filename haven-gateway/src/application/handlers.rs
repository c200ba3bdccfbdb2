//! 入站事件处理
//!
//! 所有客户端事件经由 [`GatewayEventHandler::handle_text`] 或
//! [`GatewayEventHandler::handle_binary`] 进入，按 活跃刷新 -> 限流 -> 校验 -> 分发
//! 的顺序处理。每个需要结果的事件
//! 只产生一个终态：确认事件，或一条 `error` 事件。

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use haven_core::error::{HavenError, Result};
use haven_core::metrics::GatewayMetrics;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::events::{
    ChatDelivery, ChatMessage, ClientFrame, InboundEvent, InquiryReceived, LeadActivity,
    LeadActivityNotice, MessageSent, NewInquiry, PropertyStatusChange, PropertyUpdated,
    ServerEvent, UserInquiry,
};
use crate::domain::models::{
    ActivityEvent, ChatMessageRecord, InquiryRecord, LeadActivityRecord, Notification, Principal,
    PropertyStatusRecord, Topic,
};
use crate::domain::repositories::{
    AgentDirectoryRef, AnalyticsSinkRef, EventPersistenceRef, InterestNotifierRef, LeadScorerRef,
    OfflineMessageQueueRef,
};
use crate::domain::service::{ConnectionRegistry, RateLimiter, TopicRouter};

const AUTO_REPLY: &str = "Thanks for your inquiry! Our agent is currently offline and will get back to you as soon as possible.";
const SYSTEM_SENDER: &str = "system";

/// 事件处理策略
#[derive(Debug, Clone)]
pub struct EventPolicy {
    pub offline_ttl: Duration,
    /// 收件人离线时聊天消息是否进入离线队列
    pub queue_offline_chat: bool,
    /// 目录未返回经纪人时的咨询接收人
    pub fallback_agent_id: String,
}

impl Default for EventPolicy {
    fn default() -> Self {
        Self {
            offline_ttl: Duration::hours(24),
            queue_offline_chat: false,
            fallback_agent_id: "admin".to_string(),
        }
    }
}

/// 处理事件所需的连接上下文
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub principal: Principal,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, principal: Principal) -> Self {
        Self {
            session_id: session_id.into(),
            principal,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }
}

/// 外部协作方集合
#[derive(Clone)]
pub struct Collaborators {
    pub persistence: EventPersistenceRef,
    pub agents: AgentDirectoryRef,
    pub notifier: InterestNotifierRef,
    pub scorer: LeadScorerRef,
    pub analytics: AnalyticsSinkRef,
    pub offline_queue: OfflineMessageQueueRef,
}

/// 网关事件处理器
pub struct GatewayEventHandler {
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    router: Arc<TopicRouter>,
    collaborators: Collaborators,
    policy: EventPolicy,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayEventHandler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        router: Arc<TopicRouter>,
        collaborators: Collaborators,
        policy: EventPolicy,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            limiter,
            router,
            collaborators,
            policy,
            metrics,
        }
    }

    /// 处理一条文本帧
    pub async fn handle_text(&self, ctx: &SessionContext, text: &str) {
        self.handle_frame(ctx, ClientFrame::parse(text)).await;
    }

    /// 处理一条二进制帧，内容须为 UTF-8 编码的 JSON
    pub async fn handle_binary(&self, ctx: &SessionContext, bytes: &[u8]) {
        let parsed = std::str::from_utf8(bytes)
            .map_err(|err| HavenError::validation(format!("binary frame is not valid UTF-8: {err}")))
            .and_then(ClientFrame::parse);
        self.handle_frame(ctx, parsed).await;
    }

    async fn handle_frame(&self, ctx: &SessionContext, parsed: Result<ClientFrame>) {
        let started = Instant::now();

        if let Err(err) = self.registry.touch(&ctx.session_id) {
            // 连接在处理途中已被移除
            debug!(session_id = %ctx.session_id, error = %err, "dropping frame for closed session");
            return;
        }

        let event_name = parsed.as_ref().ok().map(|frame| frame.event.clone());
        let label = match event_name.as_deref() {
            Some(name) if InboundEvent::NAMES.contains(&name) => name,
            _ => "unknown",
        };
        self.metrics
            .inbound_events_total
            .with_label_values(&[label])
            .inc();

        // 心跳响应只刷新活跃时间，不计入限流；其余帧（包括无法解析的）都先过限流
        if matches!(&parsed, Ok(frame) if frame.is_pong()) {
            return;
        }

        if !self.limiter.allow(ctx.user_id()) {
            let err = HavenError::RateLimitExceeded {
                user_id: ctx.user_id().to_string(),
            };
            warn!(user_id = %ctx.user_id(), event = label, "rate limit exceeded");
            self.reply_error(ctx, &err, event_name.as_deref());
            return;
        }

        let frame = match parsed {
            Ok(frame) => frame,
            Err(err) => {
                debug!(user_id = %ctx.user_id(), error = %err, "malformed frame");
                self.reply_error(ctx, &err, None);
                return;
            }
        };

        let event_name = frame.event.clone();
        let event = match InboundEvent::from_frame(frame) {
            Ok(event) => event,
            Err(err) => {
                debug!(user_id = %ctx.user_id(), event = %event_name, error = %err, "invalid payload");
                self.reply_error(ctx, &err, Some(event_name.as_str()));
                return;
            }
        };

        if let Err(err) = self.dispatch(ctx, event).await {
            warn!(
                session_id = %ctx.session_id,
                user_id = %ctx.user_id(),
                event = %event_name,
                error = %err,
                "event handling failed"
            );
            self.reply_error(ctx, &err, Some(event_name.as_str()));
        }

        self.metrics
            .event_handle_duration_seconds
            .observe(started.elapsed().as_secs_f64());
    }

    /// 类型化分发
    pub async fn dispatch(&self, ctx: &SessionContext, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::UserInquiry(inquiry) => self.on_inquiry(ctx, inquiry).await,
            InboundEvent::PropertyStatusChange(change) => self.on_status_change(ctx, change).await,
            InboundEvent::ChatMessage(message) => self.on_chat_message(ctx, message).await,
            InboundEvent::JoinProperty(room) => {
                self.router.join(&ctx.session_id, &room.property_id).await;
                // 期间连接已断开：撤销，避免残留成员
                if self.registry.get(&ctx.session_id).is_none() {
                    self.router.leave(&ctx.session_id, &room.property_id).await;
                    debug!(session_id = %ctx.session_id, property_id = %room.property_id, "join after disconnect reverted");
                }
                Ok(())
            }
            InboundEvent::LeaveProperty(room) => {
                self.router.leave(&ctx.session_id, &room.property_id).await;
                Ok(())
            }
            InboundEvent::LeadActivity(activity) => self.on_lead_activity(ctx, activity).await,
            InboundEvent::Pong => Ok(()),
        }
    }

    async fn on_inquiry(&self, ctx: &SessionContext, inquiry: UserInquiry) -> Result<()> {
        let now = Utc::now();
        let inquiry_id = Uuid::new_v4().to_string();

        let record = InquiryRecord {
            id: inquiry_id.clone(),
            user_id: ctx.user_id().to_string(),
            property_id: inquiry.property_id.clone(),
            message: inquiry.message.clone(),
            contact_method: inquiry.contact_method.clone(),
            phone: inquiry.phone.clone(),
            email: inquiry.email.clone(),
            preferred_date: inquiry.preferred_date.clone(),
            created_at: now,
        };
        self.collaborators.persistence.save_inquiry(&record).await?;

        let agent_id = match self
            .collaborators
            .agents
            .find_available_agent(&inquiry.property_id)
            .await
        {
            Ok(Some(agent)) => agent.id,
            Ok(None) => self.policy.fallback_agent_id.clone(),
            Err(err) => {
                warn!(property_id = %inquiry.property_id, error = %err, "agent lookup failed, using fallback recipient");
                self.policy.fallback_agent_id.clone()
            }
        };

        let notice = ServerEvent::NewInquiry(NewInquiry {
            inquiry_id: inquiry_id.clone(),
            property_id: inquiry.property_id.clone(),
            from_user_id: ctx.user_id().to_string(),
            message: inquiry.message,
            contact_method: inquiry.contact_method,
            phone: inquiry.phone,
            email: inquiry.email,
            preferred_date: inquiry.preferred_date,
            timestamp: now,
        });

        if self.registry.is_online(&agent_id) {
            self.publish(&Topic::user(&agent_id), &notice).await;
        } else {
            self.enqueue_offline(&agent_id, &notice).await;
            let auto_reply = ServerEvent::ChatMessage(ChatDelivery {
                message_id: Uuid::new_v4().to_string(),
                sender_id: SYSTEM_SENDER.to_string(),
                recipient_id: ctx.user_id().to_string(),
                content: AUTO_REPLY.to_string(),
                property_id: Some(inquiry.property_id.clone()),
                message_type: "automated".to_string(),
                automated: true,
                timestamp: Utc::now(),
            });
            self.registry.send_event(&ctx.session_id, auto_reply);
        }

        self.registry.send_event(
            &ctx.session_id,
            ServerEvent::InquiryReceived(InquiryReceived {
                inquiry_id,
                status: "received".to_string(),
            }),
        );

        self.record_analytics(ActivityEvent {
            user_id: ctx.user_id().to_string(),
            kind: "inquiry".to_string(),
            property_id: Some(inquiry.property_id),
            metadata: None,
            timestamp: now,
        });

        debug!(user_id = %ctx.user_id(), agent_id = %agent_id, "inquiry routed");
        Ok(())
    }

    async fn on_status_change(&self, ctx: &SessionContext, change: PropertyStatusChange) -> Result<()> {
        if !ctx.principal.role.is_staff() {
            return Err(HavenError::unauthorized(
                "only admins and agents may change property status",
            ));
        }

        let previous_status = match self
            .collaborators
            .persistence
            .find_property_status(&change.property_id)
            .await
        {
            Ok(previous) => previous.map(|record| record.status),
            Err(err) => {
                warn!(property_id = %change.property_id, error = %err, "previous status lookup failed");
                None
            }
        };

        let now = Utc::now();
        let record = PropertyStatusRecord {
            property_id: change.property_id.clone(),
            status: change.status.clone(),
            previous_status: previous_status.clone(),
            updated_by: ctx.user_id().to_string(),
            details: change.details.clone(),
            updated_at: now,
        };
        self.collaborators
            .persistence
            .save_property_status(&record)
            .await?;

        let update = ServerEvent::PropertyUpdated(PropertyUpdated {
            property_id: change.property_id.clone(),
            status: change.status.clone(),
            previous_status: previous_status.clone(),
            updated_by: ctx.user_id().to_string(),
            details: change.details,
            timestamp: now,
        });
        self.publish(&Topic::property_updates(), &update).await;
        self.publish(&Topic::property(&change.property_id), &update).await;

        let summary = match previous_status.as_deref() {
            Some(previous) => format!(
                "Property {} changed from {} to {}",
                change.property_id, previous, change.status
            ),
            None => format!("Property {} is now {}", change.property_id, change.status),
        };
        let notification = Notification {
            kind: "property_status".to_string(),
            title: "Property status updated".to_string(),
            message: summary,
            property_id: Some(change.property_id.clone()),
            timestamp: now,
        };
        let notifier = self.collaborators.notifier.clone();
        let property_id = change.property_id;
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&property_id, &notification).await {
                warn!(property_id = %property_id, error = %err, "interest notification failed");
            }
        });

        Ok(())
    }

    async fn on_chat_message(&self, ctx: &SessionContext, message: ChatMessage) -> Result<()> {
        let now = Utc::now();
        let message_id = Uuid::new_v4().to_string();
        let message_type = message
            .message_type
            .clone()
            .unwrap_or_else(|| "text".to_string());

        let record = ChatMessageRecord {
            id: message_id.clone(),
            sender_id: ctx.user_id().to_string(),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            property_id: message.property_id.clone(),
            message_type: message_type.clone(),
            created_at: now,
        };
        self.collaborators
            .persistence
            .save_chat_message(&record)
            .await?;

        let delivery = ServerEvent::ChatMessage(ChatDelivery {
            message_id: message_id.clone(),
            sender_id: ctx.user_id().to_string(),
            recipient_id: message.recipient_id.clone(),
            content: message.content,
            property_id: message.property_id,
            message_type,
            automated: false,
            timestamp: now,
        });

        let delivered = self
            .publish(&Topic::user(&message.recipient_id), &delivery)
            .await;
        if delivered == 0
            && self.policy.queue_offline_chat
            && !self.registry.is_online(&message.recipient_id)
        {
            self.enqueue_offline(&message.recipient_id, &delivery).await;
        }

        self.registry.send_event(
            &ctx.session_id,
            ServerEvent::MessageSent(MessageSent {
                message_id,
                timestamp: now,
            }),
        );
        Ok(())
    }

    async fn on_lead_activity(&self, ctx: &SessionContext, activity: LeadActivity) -> Result<()> {
        let now = Utc::now();
        let record = LeadActivityRecord {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id().to_string(),
            action: activity.action,
            property_id: activity.property_id.clone(),
            metadata: activity.metadata.clone(),
            created_at: now,
        };
        self.collaborators
            .persistence
            .save_lead_activity(&record)
            .await?;

        let notice = ServerEvent::LeadActivity(LeadActivityNotice {
            activity_id: record.id.clone(),
            user_id: record.user_id.clone(),
            action: activity.action,
            property_id: activity.property_id.clone(),
            weight: activity.action.weight(),
            timestamp: now,
        });
        self.publish(&Topic::lead_activity(), &notice).await;

        let scorer = self.collaborators.scorer.clone();
        let user_id = record.user_id.clone();
        let action = activity.action;
        tokio::spawn(async move {
            match scorer.update_score(&user_id, action).await {
                Ok(score) => debug!(user_id = %user_id, score, "lead score updated"),
                Err(err) => warn!(user_id = %user_id, error = %err, "lead score update failed"),
            }
        });

        self.record_analytics(ActivityEvent {
            user_id: record.user_id,
            kind: format!("lead_{}", activity.action.as_str()),
            property_id: activity.property_id,
            metadata: activity.metadata,
            timestamp: now,
        });
        Ok(())
    }

    async fn publish(&self, topic: &Topic, event: &ServerEvent) -> usize {
        self.metrics
            .topic_publishes_total
            .with_label_values(&[event.name()])
            .inc();
        self.router.publish(topic, event).await
    }

    /// 写入离线队列；失败只记录日志
    async fn enqueue_offline(&self, recipient_id: &str, event: &ServerEvent) {
        match self
            .collaborators
            .offline_queue
            .enqueue(recipient_id, event, self.policy.offline_ttl)
            .await
        {
            Ok(message) => {
                self.metrics.offline_enqueued_total.inc();
                debug!(recipient_id = %recipient_id, message_id = %message.id, event = event.name(), "queued for offline recipient");
            }
            Err(err) => {
                warn!(recipient_id = %recipient_id, event = event.name(), error = %err, "offline enqueue failed");
            }
        }
    }

    fn record_analytics(&self, event: ActivityEvent) {
        let analytics = self.collaborators.analytics.clone();
        tokio::spawn(async move {
            let kind = event.kind.clone();
            if let Err(err) = analytics.record(event).await {
                warn!(kind = %kind, error = %err, "analytics record failed");
            }
        });
    }

    fn reply_error(&self, ctx: &SessionContext, err: &HavenError, event: Option<&str>) {
        self.metrics
            .rejected_events_total
            .with_label_values(&[err.code().as_str()])
            .inc();
        self.registry
            .send_event(&ctx.session_id, ServerEvent::error(err, event));
    }
}
