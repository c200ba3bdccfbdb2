//! 进程内协作方实现
//!
//! 开发模式下替代外部 CRUD 层；测试中用于断言网关产生的副作用。
//! Redis 不可用时也会作为降级实现，所有列表都有上限，超出后淘汰最旧的条目。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use haven_core::error::Result;
use tokio::sync::RwLock;

use crate::domain::models::{
    ActivityEvent, AgentRef, ChatMessageRecord, InquiryRecord, LeadAction, LeadActivityRecord,
    Notification, PropertyStatusRecord,
};
use crate::domain::repositories::{
    AgentDirectory, AnalyticsSink, EventPersistence, InterestNotifier, LeadScorer,
};

use super::{ANALYTICS_LIMIT, RECORD_LIMIT};

/// 尾部追加，超出 `limit` 时丢弃最旧的条目
fn push_capped<T>(list: &mut VecDeque<T>, item: T, limit: usize) {
    list.push_back(item);
    while list.len() > limit.max(1) {
        list.pop_front();
    }
}

#[derive(Default)]
struct PersistenceState {
    inquiries: VecDeque<InquiryRecord>,
    chat_messages: VecDeque<ChatMessageRecord>,
    lead_activities: VecDeque<LeadActivityRecord>,
    property_status: HashMap<String, PropertyStatusRecord>,
}

#[derive(Clone)]
pub struct InMemoryEventPersistence {
    inner: Arc<RwLock<PersistenceState>>,
    limit: usize,
}

impl Default for InMemoryEventPersistence {
    fn default() -> Self {
        Self::with_limit(RECORD_LIMIT)
    }
}

impl InMemoryEventPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每类记录最多保留 `limit` 条
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::default(),
            limit,
        }
    }

    pub async fn inquiries(&self) -> Vec<InquiryRecord> {
        self.inner.read().await.inquiries.iter().cloned().collect()
    }

    pub async fn chat_messages(&self) -> Vec<ChatMessageRecord> {
        self.inner.read().await.chat_messages.iter().cloned().collect()
    }

    pub async fn lead_activities(&self) -> Vec<LeadActivityRecord> {
        self.inner
            .read()
            .await
            .lead_activities
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPersistence for InMemoryEventPersistence {
    async fn save_inquiry(&self, record: &InquiryRecord) -> Result<()> {
        let mut state = self.inner.write().await;
        push_capped(&mut state.inquiries, record.clone(), self.limit);
        Ok(())
    }

    async fn save_chat_message(&self, record: &ChatMessageRecord) -> Result<()> {
        let mut state = self.inner.write().await;
        push_capped(&mut state.chat_messages, record.clone(), self.limit);
        Ok(())
    }

    async fn save_lead_activity(&self, record: &LeadActivityRecord) -> Result<()> {
        let mut state = self.inner.write().await;
        push_capped(&mut state.lead_activities, record.clone(), self.limit);
        Ok(())
    }

    async fn save_property_status(&self, record: &PropertyStatusRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .property_status
            .insert(record.property_id.clone(), record.clone());
        Ok(())
    }

    async fn find_property_status(
        &self,
        property_id: &str,
    ) -> Result<Option<PropertyStatusRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .property_status
            .get(property_id)
            .cloned())
    }
}

/// 房源 -> 经纪人的静态映射
#[derive(Default, Clone)]
pub struct InMemoryAgentDirectory {
    assignments: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, property_id: &str, agent_id: &str) {
        self.assignments
            .write()
            .await
            .insert(property_id.to_string(), agent_id.to_string());
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn find_available_agent(&self, property_id: &str) -> Result<Option<AgentRef>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(property_id)
            .map(|id| AgentRef {
                id: id.clone(),
                is_online: false,
            }))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryInterestNotifier {
    interested: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    sent: Arc<RwLock<VecDeque<(String, Notification)>>>,
}

impl InMemoryInterestNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_interest(&self, property_id: &str, user_id: &str) {
        self.interested
            .write()
            .await
            .entry(property_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// 已发送的 (user_id, notification)
    pub async fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl InterestNotifier for InMemoryInterestNotifier {
    async fn notify(&self, property_id: &str, notification: &Notification) -> Result<()> {
        let users: Vec<String> = self
            .interested
            .read()
            .await
            .get(property_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();

        let mut sent = self.sent.write().await;
        for user_id in users {
            push_capped(&mut sent, (user_id, notification.clone()), RECORD_LIMIT);
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryLeadScorer {
    scores: Arc<RwLock<HashMap<String, i64>>>,
}

impl InMemoryLeadScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn score(&self, user_id: &str) -> i64 {
        self.scores.read().await.get(user_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LeadScorer for InMemoryLeadScorer {
    async fn update_score(&self, user_id: &str, action: LeadAction) -> Result<i64> {
        let mut scores = self.scores.write().await;
        let score = scores.entry(user_id.to_string()).or_insert(0);
        *score += action.weight();
        Ok(*score)
    }
}

#[derive(Clone)]
pub struct InMemoryAnalyticsSink {
    events: Arc<RwLock<VecDeque<ActivityEvent>>>,
    limit: usize,
}

impl Default for InMemoryAnalyticsSink {
    fn default() -> Self {
        Self::with_limit(ANALYTICS_LIMIT)
    }
}

impl InMemoryAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Arc::default(),
            limit,
        }
    }

    pub async fn events(&self) -> Vec<ActivityEvent> {
        self.events.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalyticsSink {
    async fn record(&self, event: ActivityEvent) -> Result<()> {
        push_capped(&mut *self.events.write().await, event, self.limit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_lead_scores_accumulate() {
        let scorer = InMemoryLeadScorer::new();
        scorer.update_score("u1", LeadAction::View).await.unwrap();
        scorer.update_score("u1", LeadAction::Save).await.unwrap();
        let total = scorer
            .update_score("u1", LeadAction::ScheduleTour)
            .await
            .unwrap();
        assert_eq!(total, 12);
        assert_eq!(scorer.score("u2").await, 0);
    }

    #[tokio::test]
    async fn test_notifier_fans_out_to_interested_users() {
        let notifier = InMemoryInterestNotifier::new();
        notifier.register_interest("P1", "u1").await;
        notifier.register_interest("P1", "u2").await;
        notifier.register_interest("P2", "u3").await;

        let notification = Notification {
            kind: "property_status".to_string(),
            title: "Status changed".to_string(),
            message: "P1 is now sold".to_string(),
            property_id: Some("P1".to_string()),
            timestamp: Utc::now(),
        };
        notifier.notify("P1", &notification).await.unwrap();

        let mut users: Vec<_> = notifier.sent().await.into_iter().map(|(u, _)| u).collect();
        users.sort();
        assert_eq!(users, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_property_status_lookup() {
        let store = InMemoryEventPersistence::new();
        assert!(store.find_property_status("P1").await.unwrap().is_none());

        let record = PropertyStatusRecord {
            property_id: "P1".to_string(),
            status: "available".to_string(),
            previous_status: None,
            updated_by: "a1".to_string(),
            details: None,
            updated_at: Utc::now(),
        };
        store.save_property_status(&record).await.unwrap();
        assert_eq!(
            store.find_property_status("P1").await.unwrap().unwrap().status,
            "available"
        );
    }

    #[tokio::test]
    async fn test_records_are_capped_oldest_first() {
        let store = InMemoryEventPersistence::with_limit(3);
        for i in 0..5 {
            let record = InquiryRecord {
                id: format!("inq-{i}"),
                user_id: "u1".to_string(),
                property_id: "P1".to_string(),
                message: "hello".to_string(),
                contact_method: None,
                phone: None,
                email: None,
                preferred_date: None,
                created_at: Utc::now(),
            };
            store.save_inquiry(&record).await.unwrap();
        }
        let ids: Vec<_> = store.inquiries().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["inq-2", "inq-3", "inq-4"]);
    }

    #[tokio::test]
    async fn test_analytics_sink_is_capped() {
        let sink = InMemoryAnalyticsSink::with_limit(2);
        for kind in ["inquiry", "chat", "lead"] {
            sink.record(ActivityEvent {
                kind: kind.to_string(),
                user_id: "u1".to_string(),
                property_id: None,
                metadata: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        }
        let kinds: Vec<_> = sink.events().await.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["chat", "lead"]);
    }
}
