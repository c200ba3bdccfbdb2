//! # Prometheus 指标收集模块
//!
//! 为网关服务提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 实时网关指标
#[derive(Clone)]
pub struct GatewayMetrics {
    /// 当前活跃连接数
    pub active_connections: IntGauge,
    /// 累计接入连接数
    pub connections_total: IntCounter,
    /// 握手认证失败次数
    pub auth_failures_total: IntCounter,
    /// 入站事件数（按事件名）
    pub inbound_events_total: IntCounterVec,
    /// 被拒绝的事件数（按错误码）
    pub rejected_events_total: IntCounterVec,
    /// 事件处理耗时（秒）
    pub event_handle_duration_seconds: Histogram,
    /// 写入离线队列的消息数
    pub offline_enqueued_total: IntCounter,
    /// 上线时投递的离线消息数
    pub offline_delivered_total: IntCounter,
    /// 因过期被丢弃的离线消息数
    pub offline_expired_total: IntCounter,
    /// 主题广播次数
    pub topic_publishes_total: IntCounterVec,
    /// 心跳清理剔除的连接数
    pub reaper_evictions_total: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let active_connections = IntGauge::new(
            "gateway_active_connections",
            "Number of live client connections",
        )
        .expect("Failed to create gateway_active_connections metric");

        let connections_total = IntCounter::new(
            "gateway_connections_total",
            "Total number of admitted connections",
        )
        .expect("Failed to create gateway_connections_total metric");

        let auth_failures_total = IntCounter::new(
            "gateway_auth_failures_total",
            "Total number of rejected handshakes",
        )
        .expect("Failed to create gateway_auth_failures_total metric");

        let inbound_events_total = IntCounterVec::new(
            Opts::new(
                "gateway_inbound_events_total",
                "Total number of inbound client events",
            ),
            &["event"],
        )
        .expect("Failed to create gateway_inbound_events_total metric");

        let rejected_events_total = IntCounterVec::new(
            Opts::new(
                "gateway_rejected_events_total",
                "Total number of inbound events answered with an error",
            ),
            &["reason"],
        )
        .expect("Failed to create gateway_rejected_events_total metric");

        let event_handle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_event_handle_duration_seconds",
                "Inbound event handling duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .expect("Failed to create gateway_event_handle_duration_seconds metric");

        let offline_enqueued_total = IntCounter::new(
            "gateway_offline_enqueued_total",
            "Total number of messages queued for offline recipients",
        )
        .expect("Failed to create gateway_offline_enqueued_total metric");

        let offline_delivered_total = IntCounter::new(
            "gateway_offline_delivered_total",
            "Total number of queued messages delivered on connect",
        )
        .expect("Failed to create gateway_offline_delivered_total metric");

        let offline_expired_total = IntCounter::new(
            "gateway_offline_expired_total",
            "Total number of queued messages dropped after expiry",
        )
        .expect("Failed to create gateway_offline_expired_total metric");

        let topic_publishes_total = IntCounterVec::new(
            Opts::new(
                "gateway_topic_publishes_total",
                "Total number of topic broadcasts",
            ),
            &["event"],
        )
        .expect("Failed to create gateway_topic_publishes_total metric");

        let reaper_evictions_total = IntCounter::new(
            "gateway_reaper_evictions_total",
            "Total number of idle connections evicted by the reaper",
        )
        .expect("Failed to create gateway_reaper_evictions_total metric");

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(active_connections.clone()));
        let _ = REGISTRY.register(Box::new(connections_total.clone()));
        let _ = REGISTRY.register(Box::new(auth_failures_total.clone()));
        let _ = REGISTRY.register(Box::new(inbound_events_total.clone()));
        let _ = REGISTRY.register(Box::new(rejected_events_total.clone()));
        let _ = REGISTRY.register(Box::new(event_handle_duration_seconds.clone()));
        let _ = REGISTRY.register(Box::new(offline_enqueued_total.clone()));
        let _ = REGISTRY.register(Box::new(offline_delivered_total.clone()));
        let _ = REGISTRY.register(Box::new(offline_expired_total.clone()));
        let _ = REGISTRY.register(Box::new(topic_publishes_total.clone()));
        let _ = REGISTRY.register(Box::new(reaper_evictions_total.clone()));

        Self {
            active_connections,
            connections_total,
            auth_failures_total,
            inbound_events_total,
            rejected_events_total,
            event_handle_duration_seconds,
            offline_enqueued_total,
            offline_delivered_total,
            offline_expired_total,
            topic_publishes_total,
            reaper_evictions_total,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 Prometheus 文本格式导出全局注册表
pub fn render() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_after_update() {
        let metrics = GatewayMetrics::new();
        metrics.connections_total.inc();
        metrics
            .inbound_events_total
            .with_label_values(&["chat_message"])
            .inc();

        let text = render().unwrap();
        assert!(text.contains("gateway_connections_total"));
        assert!(text.contains("gateway_inbound_events_total"));
    }

    #[test]
    fn test_duplicate_construction_does_not_panic() {
        let _first = GatewayMetrics::new();
        let second = GatewayMetrics::default();
        second.active_connections.set(3);
        assert_eq!(second.active_connections.get(), 3);
    }
}
