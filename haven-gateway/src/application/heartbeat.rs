//! 心跳与空闲连接清理

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use haven_core::metrics::GatewayMetrics;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::domain::events::{OutboundFrame, ServerEvent};
use crate::domain::service::ConnectionRegistry;

use super::connection::ConnectionService;

const IDLE_CLOSE_REASON: &str = "idle timeout";
const SATURATED_CLOSE_REASON: &str = "outbound queue full";

/// 单次心跳的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub evicted: usize,
}

pub struct HeartbeatService {
    registry: Arc<ConnectionRegistry>,
    connections: Arc<ConnectionService>,
    interval: StdDuration,
    idle_timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl HeartbeatService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connections: Arc<ConnectionService>,
        interval: StdDuration,
        idle_timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            connections,
            interval,
            idle_timeout,
            metrics,
        }
    }

    /// 启动后台心跳任务
    pub fn start(self: Arc<Self>) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 首次 tick 立即触发
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.tick_at(Utc::now()).await;
                        debug!(pinged = report.pinged, evicted = report.evicted, "heartbeat tick");
                    }
                    _ = &mut stop_rx => break,
                }
            }
            info!("heartbeat stopped");
        });

        HeartbeatHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    /// 执行一次心跳：广播 ping，剔除超时与出站队列写满的连接
    pub async fn tick_at(&self, now: DateTime<Utc>) -> HeartbeatReport {
        let pinged = self.registry.broadcast(&ServerEvent::ping(now));

        let mut evicted = 0;
        // 队列已满，无法再写入关闭帧
        for info in self.registry.find_saturated() {
            if self
                .connections
                .disconnect(&info.session_id, SATURATED_CLOSE_REASON)
                .await
                .is_some()
            {
                evicted += 1;
                self.metrics.reaper_evictions_total.inc();
                info!(
                    session_id = %info.session_id,
                    user_id = %info.user_id,
                    "evicted connection with full outbound queue"
                );
            }
        }

        let idle = self.registry.find_idle(now, self.idle_timeout);
        for info in idle {
            self.registry.send(
                &info.session_id,
                OutboundFrame::Close {
                    reason: IDLE_CLOSE_REASON.to_string(),
                },
            );
            if self
                .connections
                .disconnect(&info.session_id, IDLE_CLOSE_REASON)
                .await
                .is_some()
            {
                evicted += 1;
                self.metrics.reaper_evictions_total.inc();
                info!(
                    session_id = %info.session_id,
                    user_id = %info.user_id,
                    idle_secs = info.idle_for(now).num_seconds(),
                    "evicted idle connection"
                );
            }
        }

        HeartbeatReport { pinged, evicted }
    }
}

pub struct HeartbeatHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}
