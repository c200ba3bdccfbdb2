//! Redis 协作方实现
//!
//! 键均带命名空间前缀：
//! - `{ns}:inquiry:{id}` / `{ns}:chat_message:{id}`：JSON 记录
//! - `{ns}:lead_activity:{user_id}`：LIST，最近的线索行为
//! - `{ns}:property_status`：HASH，property_id -> 最新状态 JSON
//! - `{ns}:property_agent`：HASH，property_id -> agent_id
//! - `{ns}:agents:available`：SET，当前可接单的经纪人
//! - `{ns}:property_interest:{property_id}`：SET，关注该房源的用户
//! - `{ns}:notifications:{user_id}`：LIST，用户通知收件箱
//! - `{ns}:lead_scores`：HASH，user_id -> 累计线索分
//! - `{ns}:analytics`：LIST，埋点事件

use anyhow::Context;
use async_trait::async_trait;
use haven_core::error::{InfraResult, InfraResultExt, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;

use crate::domain::models::{
    ActivityEvent, AgentRef, ChatMessageRecord, InquiryRecord, LeadAction, LeadActivityRecord,
    Notification, PropertyStatusRecord,
};
use crate::domain::repositories::{
    AgentDirectory, AnalyticsSink, EventPersistence, InterestNotifier, LeadScorer,
};

use super::ANALYTICS_LIMIT;

const RECORD_TTL_SECONDS: i64 = 30 * 24 * 3600;
const LEAD_HISTORY_LIMIT: usize = 500;
const INBOX_LIMIT: usize = 100;

/// 共享的 Redis 访问封装
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> InfraResult<()> {
        let payload = serde_json::to_string(value).context("encode record")?;
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(key, payload, RECORD_TTL_SECONDS as u64)
            .await
            .with_context(|| format!("set {key}"))?;
        Ok(())
    }

    async fn push_capped<T: Serialize>(&self, key: &str, value: &T, limit: usize) -> InfraResult<()> {
        let payload = serde_json::to_string(value).context("encode entry")?;
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .lpush(key, payload)
            .ignore()
            .ltrim(key, 0, limit as isize - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .with_context(|| format!("lpush {key}"))?;
        Ok(())
    }
}

pub struct RedisEventPersistence {
    store: RedisStore,
}

impl RedisEventPersistence {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    async fn save_status(&self, record: &PropertyStatusRecord) -> InfraResult<()> {
        let key = self.store.key("property_status");
        let payload = serde_json::to_string(record).context("encode property status")?;
        let mut conn = self.store.conn();
        let _: () = conn
            .hset(&key, &record.property_id, payload)
            .await
            .with_context(|| format!("hset {key}"))?;
        Ok(())
    }

    async fn load_status(&self, property_id: &str) -> InfraResult<Option<PropertyStatusRecord>> {
        let key = self.store.key("property_status");
        let mut conn = self.store.conn();
        let raw: Option<String> = conn
            .hget(&key, property_id)
            .await
            .with_context(|| format!("hget {key}"))?;
        raw.map(|raw| serde_json::from_str(&raw).context("invalid property status json"))
            .transpose()
    }
}

#[async_trait]
impl EventPersistence for RedisEventPersistence {
    async fn save_inquiry(&self, record: &InquiryRecord) -> Result<()> {
        let key = self.store.key(&format!("inquiry:{}", record.id));
        self.store
            .set_json(&key, record)
            .await
            .into_collaborator("persistence")
    }

    async fn save_chat_message(&self, record: &ChatMessageRecord) -> Result<()> {
        let key = self.store.key(&format!("chat_message:{}", record.id));
        self.store
            .set_json(&key, record)
            .await
            .into_collaborator("persistence")
    }

    async fn save_lead_activity(&self, record: &LeadActivityRecord) -> Result<()> {
        let key = self.store.key(&format!("lead_activity:{}", record.user_id));
        self.store
            .push_capped(&key, record, LEAD_HISTORY_LIMIT)
            .await
            .into_collaborator("persistence")
    }

    async fn save_property_status(&self, record: &PropertyStatusRecord) -> Result<()> {
        self.save_status(record)
            .await
            .into_collaborator("persistence")
    }

    async fn find_property_status(
        &self,
        property_id: &str,
    ) -> Result<Option<PropertyStatusRecord>> {
        self.load_status(property_id)
            .await
            .into_collaborator("persistence")
    }
}

pub struct RedisAgentDirectory {
    store: RedisStore,
}

impl RedisAgentDirectory {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    async fn lookup(&self, property_id: &str) -> InfraResult<Option<AgentRef>> {
        let assignments = self.store.key("property_agent");
        let available = self.store.key("agents:available");
        let mut conn = self.store.conn();

        let agent_id: Option<String> = conn
            .hget(&assignments, property_id)
            .await
            .with_context(|| format!("hget {assignments}"))?;
        let Some(id) = agent_id else {
            return Ok(None);
        };

        let is_online: bool = conn
            .sismember(&available, &id)
            .await
            .with_context(|| format!("sismember {available}"))?;
        Ok(Some(AgentRef { id, is_online }))
    }
}

#[async_trait]
impl AgentDirectory for RedisAgentDirectory {
    async fn find_available_agent(&self, property_id: &str) -> Result<Option<AgentRef>> {
        self.lookup(property_id)
            .await
            .into_collaborator("agent_directory")
    }
}

pub struct RedisInterestNotifier {
    store: RedisStore,
}

impl RedisInterestNotifier {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    async fn fan_out(&self, property_id: &str, notification: &Notification) -> InfraResult<()> {
        let interest = self.store.key(&format!("property_interest:{property_id}"));
        let mut conn = self.store.conn();
        let users: Vec<String> = conn
            .smembers(&interest)
            .await
            .with_context(|| format!("smembers {interest}"))?;

        for user_id in users {
            let inbox = self.store.key(&format!("notifications:{user_id}"));
            self.store.push_capped(&inbox, notification, INBOX_LIMIT).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl InterestNotifier for RedisInterestNotifier {
    async fn notify(&self, property_id: &str, notification: &Notification) -> Result<()> {
        self.fan_out(property_id, notification)
            .await
            .into_collaborator("interest_notifier")
    }
}

pub struct RedisLeadScorer {
    store: RedisStore,
}

impl RedisLeadScorer {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LeadScorer for RedisLeadScorer {
    async fn update_score(&self, user_id: &str, action: LeadAction) -> Result<i64> {
        let key = self.store.key("lead_scores");
        let mut conn = self.store.conn();
        let score: InfraResult<i64> = conn
            .hincr(&key, user_id, action.weight())
            .await
            .with_context(|| format!("hincrby {key}"));
        score.into_collaborator("lead_scorer")
    }
}

pub struct RedisAnalyticsSink {
    store: RedisStore,
}

impl RedisAnalyticsSink {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AnalyticsSink for RedisAnalyticsSink {
    async fn record(&self, event: ActivityEvent) -> Result<()> {
        let key = self.store.key("analytics");
        self.store
            .push_capped(&key, &event, ANALYTICS_LIMIT)
            .await
            .into_collaborator("analytics")
    }
}
