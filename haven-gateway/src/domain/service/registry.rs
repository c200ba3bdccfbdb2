//! 连接注册表
//!
//! 记录当前进程内的所有已认证连接及其发送通道。

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use haven_core::error::{HavenError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::domain::events::{OutboundFrame, ServerEvent};
use crate::domain::models::{ConnectionInfo, Principal};

pub type OutboundSender = mpsc::Sender<OutboundFrame>;
pub type OutboundReceiver = mpsc::Receiver<OutboundFrame>;

/// 创建有界的出站通道
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

struct ConnectionEntry {
    info: ConnectionInfo,
    sender: OutboundSender,
    /// 出站队列曾写满，等待剔除
    saturated: bool,
}

/// 连接注册表
///
/// `connections`: session_id -> 连接；`user_sessions`: user_id -> session_id 集合
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
    user_sessions: DashMap<String, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接，会话 ID 已存在时返回 `DuplicateSession`
    pub fn register(
        &self,
        session_id: &str,
        principal: &Principal,
        sender: OutboundSender,
    ) -> Result<ConnectionInfo> {
        let now = Utc::now();
        let info = ConnectionInfo {
            session_id: session_id.to_string(),
            user_id: principal.user_id.clone(),
            role: principal.role,
            connected_at: now,
            last_activity_at: now,
        };

        match self.connections.entry(session_id.to_string()) {
            Entry::Occupied(_) => return Err(HavenError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    info: info.clone(),
                    sender,
                    saturated: false,
                });
            }
        }

        self.user_sessions
            .entry(principal.user_id.clone())
            .or_default()
            .insert(session_id.to_string());

        debug!(session_id = %session_id, user_id = %principal.user_id, "connection registered");
        Ok(info)
    }

    /// 刷新最近活跃时间
    pub fn touch(&self, session_id: &str) -> Result<()> {
        self.touch_at(session_id, Utc::now())
    }

    pub fn touch_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        match self.connections.get_mut(session_id) {
            Some(mut entry) => {
                if now > entry.info.last_activity_at {
                    entry.info.last_activity_at = now;
                }
                Ok(())
            }
            None => Err(HavenError::UnknownSession(session_id.to_string())),
        }
    }

    /// 幂等移除，返回被移除的连接
    pub fn unregister(&self, session_id: &str) -> Option<ConnectionInfo> {
        let (_, entry) = self.connections.remove(session_id)?;
        let user_id = entry.info.user_id.clone();

        if let Some(mut sessions) = self.user_sessions.get_mut(&user_id) {
            sessions.remove(session_id);
        }
        self.user_sessions
            .remove_if(&user_id, |_, sessions| sessions.is_empty());

        debug!(session_id = %session_id, user_id = %user_id, "connection unregistered");
        Some(entry.info)
    }

    pub fn get(&self, session_id: &str) -> Option<ConnectionInfo> {
        self.connections
            .get(session_id)
            .map(|entry| entry.info.clone())
    }

    /// 当前连接快照，无顺序保证
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.user_sessions
            .get(user_id)
            .map(|sessions| !sessions.is_empty())
            .unwrap_or(false)
    }

    pub fn sessions_of(&self, user_id: &str) -> Vec<String> {
        self.user_sessions
            .get(user_id)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 向指定连接写入一帧，连接不存在、通道已关闭或队列已满时返回 false
    ///
    /// 队列写满的连接被标记为 saturated，之后的写入全部丢弃，由心跳剔除。
    pub fn send(&self, session_id: &str, frame: OutboundFrame) -> bool {
        let Some(mut entry) = self.connections.get_mut(session_id) else {
            return false;
        };
        if entry.saturated {
            return false;
        }
        match entry.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                entry.saturated = true;
                warn!(
                    session_id = %session_id,
                    user_id = %entry.info.user_id,
                    "outbound queue full, connection will be evicted"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_event(&self, session_id: &str, event: ServerEvent) -> bool {
        self.send(session_id, OutboundFrame::Event(event))
    }

    /// 向所有连接广播，返回成功写入的连接数
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let sessions: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        sessions
            .iter()
            .filter(|session_id| self.send(session_id, OutboundFrame::Event(event.clone())))
            .count()
    }

    /// 连接仍在注册表中且出站队列未写满
    pub fn is_writable(&self, session_id: &str) -> bool {
        self.connections
            .get(session_id)
            .map(|entry| !entry.saturated)
            .unwrap_or(false)
    }

    /// 出站队列已写满的连接
    pub fn find_saturated(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter(|entry| entry.saturated)
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// 找出空闲超过 `timeout` 的连接
    pub fn find_idle(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter(|entry| entry.info.idle_for(now) > timeout)
            .map(|entry| entry.info.clone())
            .collect()
    }
}
