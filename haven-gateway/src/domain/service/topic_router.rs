//! 主题路由服务
//!
//! 负责连接对主题的订阅、退订以及主题广播

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::events::ServerEvent;
use crate::domain::models::{Principal, Topic};

use super::registry::ConnectionRegistry;

#[derive(Default)]
struct TopicIndex {
    /// 主题订阅映射：topic -> session_ids
    members: HashMap<Topic, HashSet<String>>,
    /// 反向映射：session_id -> topics
    memberships: HashMap<String, HashSet<Topic>>,
}

impl TopicIndex {
    fn insert(&mut self, session_id: &str, topic: &Topic) -> bool {
        let added = self
            .members
            .entry(topic.clone())
            .or_default()
            .insert(session_id.to_string());
        self.memberships
            .entry(session_id.to_string())
            .or_default()
            .insert(topic.clone());
        added
    }

    fn remove(&mut self, session_id: &str, topic: &Topic) -> bool {
        let mut removed = false;
        if let Some(members) = self.members.get_mut(topic) {
            removed = members.remove(session_id);
            if members.is_empty() {
                self.members.remove(topic);
            }
        }
        if let Some(topics) = self.memberships.get_mut(session_id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.memberships.remove(session_id);
            }
        }
        removed
    }
}

/// 主题路由
pub struct TopicRouter {
    registry: Arc<ConnectionRegistry>,
    index: RwLock<TopicIndex>,
}

impl TopicRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            index: RwLock::new(TopicIndex::default()),
        }
    }

    /// 订阅主题（幂等）
    pub async fn subscribe(&self, session_id: &str, topic: &Topic) {
        let added = self.index.write().await.insert(session_id, topic);
        if added {
            debug!(session_id = %session_id, topic = %topic, "subscribed to topic");
        }
    }

    /// 取消订阅（幂等）
    pub async fn unsubscribe(&self, session_id: &str, topic: &Topic) {
        let removed = self.index.write().await.remove(session_id, topic);
        if removed {
            debug!(session_id = %session_id, topic = %topic, "unsubscribed from topic");
        }
    }

    pub async fn members_of(&self, topic: &Topic) -> HashSet<String> {
        self.index
            .read()
            .await
            .members
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn topics_of(&self, session_id: &str) -> HashSet<Topic> {
        self.index
            .read()
            .await
            .memberships
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn topic_count(&self) -> usize {
        self.index.read().await.members.len()
    }

    /// 向主题内所有仍在线的连接投递事件，返回投递成功的连接数
    ///
    /// 不做持久化或排队，收件人离线时是否排队由调用方决定。
    pub async fn publish(&self, topic: &Topic, event: &ServerEvent) -> usize {
        let members = self.members_of(topic).await;
        let delivered = members
            .iter()
            .filter(|session_id| self.registry.send_event(session_id, event.clone()))
            .count();

        debug!(
            topic = %topic,
            event = event.name(),
            members = members.len(),
            delivered,
            "published to topic"
        );
        delivered
    }

    /// 按角色建立自动订阅，返回订阅的主题
    pub async fn subscribe_defaults(&self, session_id: &str, principal: &Principal) -> Vec<Topic> {
        let mut topics = vec![
            Topic::notifications(),
            Topic::market_updates(),
            Topic::user(&principal.user_id),
        ];
        if principal.role.is_staff() {
            topics.push(Topic::property_updates());
            topics.push(Topic::lead_activity());
        }

        let mut index = self.index.write().await;
        for topic in &topics {
            index.insert(session_id, topic);
        }
        topics
    }

    /// 加入房源房间
    pub async fn join(&self, session_id: &str, property_id: &str) -> Topic {
        let topic = Topic::property(property_id);
        self.subscribe(session_id, &topic).await;
        topic
    }

    /// 离开房源房间
    pub async fn leave(&self, session_id: &str, property_id: &str) -> Topic {
        let topic = Topic::property(property_id);
        self.unsubscribe(session_id, &topic).await;
        topic
    }

    /// 清除连接的全部订阅，空主题一并移除
    pub async fn drop_session(&self, session_id: &str) -> usize {
        let mut index = self.index.write().await;
        let topics = index.memberships.remove(session_id).unwrap_or_default();
        for topic in &topics {
            if let Some(members) = index.members.get_mut(topic) {
                members.remove(session_id);
                if members.is_empty() {
                    index.members.remove(topic);
                }
            }
        }
        topics.len()
    }
}
