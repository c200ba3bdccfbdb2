#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use haven_core::error::{HavenError, Result as HavenResult};
use haven_gateway::GatewayConfig;
use haven_gateway::application::{Collaborators, SessionContext};
use haven_gateway::domain::events::{OutboundFrame, ServerEvent};
use haven_gateway::domain::models::{
    ActivityEvent, ChatMessageRecord, DrainedMessages, InquiryRecord, LeadAction,
    LeadActivityRecord, Principal, PropertyStatusRecord, QueuedMessage, Role,
};
use haven_gateway::domain::repositories::{
    AnalyticsSink, EventPersistence, LeadScorer, OfflineMessageQueue,
};
use haven_gateway::domain::service::OutboundReceiver;
use haven_gateway::infrastructure::collaborators::{
    InMemoryAgentDirectory, InMemoryAnalyticsSink, InMemoryEventPersistence,
    InMemoryInterestNotifier, InMemoryLeadScorer,
};
use haven_gateway::infrastructure::offline_queue::InMemoryOfflineQueue;
use haven_gateway::service::{ApplicationContext, initialize};
use serde_json::Value;

pub const SECRET: &str = "integration-secret";

pub struct Harness {
    pub ctx: ApplicationContext,
    pub persistence: InMemoryEventPersistence,
    pub agents: InMemoryAgentDirectory,
    pub notifier: InMemoryInterestNotifier,
    pub scorer: InMemoryLeadScorer,
    pub analytics: InMemoryAnalyticsSink,
    pub offline: InMemoryOfflineQueue,
}

pub struct Client {
    pub session: SessionContext,
    pub rx: OutboundReceiver,
}

impl Client {
    /// 取出当前已收到的全部事件
    pub fn events(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let OutboundFrame::Event(event) = frame {
                out.push(event);
            }
        }
        out
    }

    pub fn frames(&mut self) -> Vec<OutboundFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(frame);
        }
        out
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        token_secret: Some(SECRET.to_string()),
        ..Default::default()
    }
}

pub fn harness(config: GatewayConfig) -> Harness {
    harness_with(config, |_| {})
}

/// 构建前替换部分协作方，被替换的内存实现不再接收写入
pub fn harness_with(config: GatewayConfig, customize: impl FnOnce(&mut Collaborators)) -> Harness {
    let _ = tracing_subscriber::fmt::try_init();

    let persistence = InMemoryEventPersistence::new();
    let agents = InMemoryAgentDirectory::new();
    let notifier = InMemoryInterestNotifier::new();
    let scorer = InMemoryLeadScorer::new();
    let analytics = InMemoryAnalyticsSink::new();
    let offline = InMemoryOfflineQueue::new();

    let mut collaborators = Collaborators {
        persistence: Arc::new(persistence.clone()),
        agents: Arc::new(agents.clone()),
        notifier: Arc::new(notifier.clone()),
        scorer: Arc::new(scorer.clone()),
        analytics: Arc::new(analytics.clone()),
        offline_queue: Arc::new(offline.clone()),
    };
    customize(&mut collaborators);
    let ctx = match initialize(config, collaborators) {
        Ok(ctx) => ctx,
        Err(err) => panic!("failed to initialize gateway: {err:#}"),
    };

    Harness {
        ctx,
        persistence,
        agents,
        notifier,
        scorer,
        analytics,
        offline,
    }
}

impl Harness {
    pub async fn connect(&self, session_id: &str, user_id: &str, role: Role) -> Result<Client> {
        let principal = Principal::new(user_id, role);
        let (tx, rx) = self.ctx.connections.channel();
        self.ctx.connections.admit(session_id, &principal, tx).await?;
        Ok(Client {
            session: SessionContext::new(session_id, principal),
            rx,
        })
    }

    pub async fn send(&self, client: &Client, event: &str, data: Value) {
        let text = serde_json::json!({ "event": event, "data": data }).to_string();
        self.ctx.events.handle_text(&client.session, &text).await;
    }

    pub async fn send_raw(&self, client: &Client, text: &str) {
        self.ctx.events.handle_text(&client.session, text).await;
    }
}

/// 等待后台任务完成
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// 所有调用都返回 `CollaboratorUnavailable` 的协作方
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

fn unavailable(collaborator: &'static str) -> HavenError {
    HavenError::collaborator(collaborator, "connection refused")
}

#[async_trait]
impl EventPersistence for Unavailable {
    async fn save_inquiry(&self, _record: &InquiryRecord) -> HavenResult<()> {
        Err(unavailable("persistence"))
    }

    async fn save_chat_message(&self, _record: &ChatMessageRecord) -> HavenResult<()> {
        Err(unavailable("persistence"))
    }

    async fn save_lead_activity(&self, _record: &LeadActivityRecord) -> HavenResult<()> {
        Err(unavailable("persistence"))
    }

    async fn save_property_status(&self, _record: &PropertyStatusRecord) -> HavenResult<()> {
        Err(unavailable("persistence"))
    }

    async fn find_property_status(
        &self,
        _property_id: &str,
    ) -> HavenResult<Option<PropertyStatusRecord>> {
        Err(unavailable("persistence"))
    }
}

#[async_trait]
impl LeadScorer for Unavailable {
    async fn update_score(&self, _user_id: &str, _action: LeadAction) -> HavenResult<i64> {
        Err(unavailable("lead_scorer"))
    }
}

#[async_trait]
impl AnalyticsSink for Unavailable {
    async fn record(&self, _event: ActivityEvent) -> HavenResult<()> {
        Err(unavailable("analytics"))
    }
}

#[async_trait]
impl OfflineMessageQueue for Unavailable {
    async fn enqueue(
        &self,
        _recipient_id: &str,
        _event: &ServerEvent,
        _ttl: Duration,
    ) -> HavenResult<QueuedMessage> {
        Err(unavailable("offline_queue"))
    }

    async fn drain(&self, _recipient_id: &str) -> HavenResult<DrainedMessages> {
        Err(unavailable("offline_queue"))
    }
}
