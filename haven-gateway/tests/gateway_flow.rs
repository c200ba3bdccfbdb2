// 网关事件流集成测试 - 使用进程内协作方驱动应用层
mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use haven_core::error::ErrorCode;
use haven_gateway::domain::events::{InboundEvent, OutboundFrame, PropertyRoom, ServerEvent};
use haven_gateway::domain::models::{Role, Topic};
use serde_json::json;

use common::{Unavailable, harness, harness_with, settle, test_config};

fn error_reason(event: &ServerEvent) -> Option<ErrorCode> {
    match event {
        ServerEvent::Error(notice) => Some(notice.reason),
        _ => None,
    }
}

#[tokio::test]
async fn test_inquiry_with_no_agent_online_is_queued_and_auto_replied() -> Result<()> {
    let h = harness(test_config());
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(
        &tenant,
        "user_inquiry",
        json!({ "property_id": "prop-9", "message": "Is parking included?", "contact_method": "email" }),
    )
    .await;

    let events = tenant.events();
    assert_eq!(events.len(), 2, "unexpected events: {events:?}");
    match &events[0] {
        ServerEvent::ChatMessage(reply) => {
            assert!(reply.automated);
            assert_eq!(reply.recipient_id, "tenant-1");
            assert_eq!(reply.property_id.as_deref(), Some("prop-9"));
        }
        other => panic!("expected automated reply, got {other:?}"),
    }
    let inquiry_id = match &events[1] {
        ServerEvent::InquiryReceived(ack) => {
            assert_eq!(ack.status, "received");
            ack.inquiry_id.clone()
        }
        other => panic!("expected inquiry_received, got {other:?}"),
    };

    let stored = h.persistence.inquiries().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, inquiry_id);
    assert_eq!(h.offline.len("admin").await, 1);

    // 回退经纪人上线后收到排队的咨询
    let mut admin = h.connect("s-admin", "admin", Role::Admin).await?;
    let delivered = admin.events();
    assert_eq!(delivered.len(), 1);
    match &delivered[0] {
        ServerEvent::QueuedMessage(queued) => {
            assert_eq!(queued.event, "new_inquiry");
            assert_eq!(queued.data["inquiry_id"], json!(inquiry_id));
            assert_eq!(queued.data["from_user_id"], json!("tenant-1"));
        }
        other => panic!("expected queued_message, got {other:?}"),
    }
    assert_eq!(h.offline.len("admin").await, 0);

    settle().await;
    let analytics = h.analytics.events().await;
    assert!(analytics.iter().any(|e| e.kind == "inquiry" && e.user_id == "tenant-1"));
    Ok(())
}

#[tokio::test]
async fn test_inquiry_routes_to_online_assigned_agent() -> Result<()> {
    let h = harness(test_config());
    h.agents.assign("prop-1", "agent-7").await;
    let mut agent = h.connect("s-agent", "agent-7", Role::Agent).await?;
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(
        &tenant,
        "user_inquiry",
        json!({ "property_id": "prop-1", "message": "Can I view it Friday?" }),
    )
    .await;

    let agent_events = agent.events();
    assert_eq!(agent_events.len(), 1);
    match &agent_events[0] {
        ServerEvent::NewInquiry(inquiry) => {
            assert_eq!(inquiry.property_id, "prop-1");
            assert_eq!(inquiry.from_user_id, "tenant-1");
        }
        other => panic!("expected new_inquiry, got {other:?}"),
    }

    let tenant_events = tenant.events();
    assert_eq!(tenant_events.len(), 1);
    assert!(matches!(tenant_events[0], ServerEvent::InquiryReceived(_)));
    assert_eq!(h.offline.len("agent-7").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_status_change_requires_staff_and_fans_out() -> Result<()> {
    let h = harness(test_config());
    h.notifier.register_interest("prop-3", "watcher-1").await;

    let mut agent = h.connect("s-agent", "agent-1", Role::Agent).await?;
    let mut admin = h.connect("s-admin", "admin-1", Role::Admin).await?;
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(&tenant, "join_property", json!({ "property_id": "prop-3" })).await;
    h.send(
        &tenant,
        "property_status_change",
        json!({ "property_id": "prop-3", "status": "rented" }),
    )
    .await;

    let denied = tenant.events();
    assert_eq!(denied.len(), 1);
    assert_eq!(error_reason(&denied[0]), Some(ErrorCode::Unauthorized));
    assert!(h.persistence.inquiries().await.is_empty());

    h.send(
        &agent,
        "property_status_change",
        json!({ "property_id": "prop-3", "status": "pending" }),
    )
    .await;
    h.send(
        &agent,
        "property_status_change",
        json!({ "property_id": "prop-3", "status": "rented", "details": { "lease": "12m" } }),
    )
    .await;

    let admin_events = admin.events();
    assert_eq!(admin_events.len(), 2);
    match &admin_events[1] {
        ServerEvent::PropertyUpdated(update) => {
            assert_eq!(update.status, "rented");
            assert_eq!(update.previous_status.as_deref(), Some("pending"));
            assert_eq!(update.updated_by, "agent-1");
        }
        other => panic!("expected property_updated, got {other:?}"),
    }

    // 房间成员也会收到
    let room_events = tenant.events();
    assert_eq!(room_events.len(), 2);
    assert!(room_events
        .iter()
        .all(|e| matches!(e, ServerEvent::PropertyUpdated(_))));

    // 发起者订阅了 property_updates
    assert_eq!(agent.events().len(), 2);

    settle().await;
    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(user, n)| user == "watcher-1" && n.property_id.as_deref() == Some("prop-3")));
    Ok(())
}

#[tokio::test]
async fn test_hundred_and_first_event_is_rate_limited() -> Result<()> {
    let h = harness(test_config());
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    for i in 0..100 {
        h.send(
            &tenant,
            "chat_message",
            json!({ "recipient_id": "agent-2", "content": format!("message {i}") }),
        )
        .await;
    }
    let acks = tenant.events();
    assert_eq!(acks.len(), 100);
    assert!(acks.iter().all(|e| matches!(e, ServerEvent::MessageSent(_))));

    h.send(
        &tenant,
        "chat_message",
        json!({ "recipient_id": "agent-2", "content": "one too many" }),
    )
    .await;
    let rejected = tenant.events();
    assert_eq!(rejected.len(), 1);
    match &rejected[0] {
        ServerEvent::Error(notice) => {
            assert_eq!(notice.reason, ErrorCode::RateLimitExceeded);
            assert_eq!(notice.event.as_deref(), Some("chat_message"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.persistence.chat_messages().await.len(), 100);
    Ok(())
}

#[tokio::test]
async fn test_pong_does_not_consume_rate_limit() -> Result<()> {
    let mut config = test_config();
    config.rate_limit_max_events = 1;
    let h = harness(config);
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    for _ in 0..5 {
        h.send_raw(&tenant, r#"{"event":"pong"}"#).await;
    }
    h.send(
        &tenant,
        "chat_message",
        json!({ "recipient_id": "agent-2", "content": "hello" }),
    )
    .await;

    let events = tenant.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::MessageSent(_)));
    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_consume_rate_limit() -> Result<()> {
    let mut config = test_config();
    config.rate_limit_max_events = 2;
    let h = harness(config);
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    for _ in 0..50 {
        h.send_raw(&tenant, "not json").await;
    }

    let events = tenant.events();
    assert_eq!(events.len(), 50);
    let validation = events
        .iter()
        .filter(|e| error_reason(e) == Some(ErrorCode::ValidationError))
        .count();
    let limited = events
        .iter()
        .filter(|e| error_reason(e) == Some(ErrorCode::RateLimitExceeded))
        .count();
    assert_eq!(validation, 2);
    assert_eq!(limited, 48);

    // pong 仍然豁免
    h.send_raw(&tenant, r#"{"event":"pong"}"#).await;
    assert!(tenant.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_utf8_binary_frame_is_rejected() -> Result<()> {
    let h = harness(test_config());
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.ctx
        .events
        .handle_binary(&tenant.session, &[b'{', 0xff, 0xfe, b'}'])
        .await;
    let events = tenant.events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_reason(&events[0]), Some(ErrorCode::ValidationError));

    let frame = json!({ "event": "chat_message", "data": { "recipient_id": "agent-2", "content": "hi" } });
    h.ctx
        .events
        .handle_binary(&tenant.session, frame.to_string().as_bytes())
        .await;
    assert!(matches!(tenant.events().as_slice(), [ServerEvent::MessageSent(_)]));
    assert_eq!(h.persistence.chat_messages().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_frames_get_validation_errors() -> Result<()> {
    let h = harness(test_config());
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send_raw(&tenant, "not json").await;
    h.send(&tenant, "teleport", json!({})).await;
    h.send(&tenant, "user_inquiry", json!({ "message": "missing property" })).await;
    h.send(&tenant, "chat_message", json!({ "recipient_id": "  ", "content": "x" })).await;

    let events = tenant.events();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|e| error_reason(e) == Some(ErrorCode::ValidationError)));
    assert!(h.persistence.inquiries().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_chat_delivery_and_optional_offline_queueing() -> Result<()> {
    let h = harness(test_config());
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;
    let mut agent = h.connect("s-agent", "agent-2", Role::Agent).await?;

    h.send(
        &tenant,
        "chat_message",
        json!({ "recipient_id": "agent-2", "content": "hi", "property_id": "prop-5" }),
    )
    .await;
    let received = agent.events();
    assert_eq!(received.len(), 1);
    match &received[0] {
        ServerEvent::ChatMessage(chat) => {
            assert_eq!(chat.sender_id, "tenant-1");
            assert_eq!(chat.message_type, "text");
            assert!(!chat.automated);
        }
        other => panic!("expected chat_message, got {other:?}"),
    }
    let acks = tenant.events();
    assert!(matches!(acks.as_slice(), [ServerEvent::MessageSent(_)]));

    // 默认不为离线收件人排队
    h.send(&tenant, "chat_message", json!({ "recipient_id": "ghost", "content": "anyone?" })).await;
    assert_eq!(h.offline.len("ghost").await, 0);

    let mut config = test_config();
    config.queue_offline_chat = true;
    let queued = harness(config);
    let sender = queued.connect("s-1", "tenant-1", Role::Tenant).await?;
    queued
        .send(&sender, "chat_message", json!({ "recipient_id": "ghost", "content": "anyone?" }))
        .await;
    assert_eq!(queued.offline.len("ghost").await, 1);
    Ok(())
}

#[tokio::test]
async fn test_lead_activity_reaches_staff_and_scores() -> Result<()> {
    let h = harness(test_config());
    let mut admin = h.connect("s-admin", "admin-1", Role::Admin).await?;
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(
        &tenant,
        "lead_activity",
        json!({ "action": "schedule_tour", "property_id": "prop-2" }),
    )
    .await;
    h.send(&tenant, "lead_activity", json!({ "action": "view" })).await;

    let notices = admin.events();
    assert_eq!(notices.len(), 2);
    match &notices[0] {
        ServerEvent::LeadActivity(notice) => {
            assert_eq!(notice.user_id, "tenant-1");
            assert_eq!(notice.weight, 8);
        }
        other => panic!("expected lead_activity, got {other:?}"),
    }
    // 非员工不订阅线索主题
    assert!(tenant.events().is_empty());
    assert_eq!(h.persistence.lead_activities().await.len(), 2);

    settle().await;
    assert_eq!(h.scorer.score("tenant-1").await, 9);
    Ok(())
}

#[tokio::test]
async fn test_expired_offline_messages_are_dropped_on_admit() -> Result<()> {
    let h = harness(test_config());
    let event = ServerEvent::ping(Utc::now());
    let long_ago = Utc::now() - Duration::hours(3);

    h.offline
        .enqueue_at("tenant-4", &event, Duration::hours(1), long_ago)
        .await?;
    h.offline
        .enqueue_at("tenant-4", &event, Duration::hours(24), long_ago)
        .await?;

    let mut tenant = h.connect("s-tenant", "tenant-4", Role::Tenant).await?;
    let delivered = tenant.events();
    assert_eq!(delivered.len(), 1);
    assert!(matches!(delivered[0], ServerEvent::QueuedMessage(_)));
    assert_eq!(h.offline.len("tenant-4").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_idle_connections_are_evicted() -> Result<()> {
    let h = harness(test_config());
    let mut idle = h.connect("s-idle", "tenant-1", Role::Tenant).await?;
    let now = Utc::now();

    // 未超时
    let report = h.ctx.heartbeat.tick_at(now + Duration::seconds(30)).await;
    assert_eq!(report.pinged, 1);
    assert_eq!(report.evicted, 0);

    let report = h.ctx.heartbeat.tick_at(now + Duration::seconds(61)).await;
    assert_eq!(report.evicted, 1);
    assert!(h.ctx.registry.is_empty());
    assert!(!h.ctx.registry.is_online("tenant-1"));
    assert!(h.ctx.router.topics_of("s-idle").await.is_empty());

    let frames = idle.frames();
    assert!(matches!(frames.last(), Some(OutboundFrame::Close { .. })));

    // 已剔除的连接不会再次处理
    let report = h.ctx.heartbeat.tick_at(now + Duration::seconds(90)).await;
    assert_eq!(report, Default::default());
    h.send(&idle, "join_property", json!({ "property_id": "prop-1" })).await;
    assert!(idle.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_is_idempotent() -> Result<()> {
    let h = harness(test_config());
    let _client = h.connect("s-1", "tenant-1", Role::Tenant).await?;
    assert!(h.connect("s-1", "tenant-1", Role::Tenant).await.is_err());

    assert!(h.ctx.connections.disconnect("s-1", "test").await.is_some());
    assert!(h.ctx.connections.disconnect("s-1", "test").await.is_none());
    assert_eq!(h.ctx.router.topic_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_join_after_disconnect_leaves_no_membership() -> Result<()> {
    let h = harness(test_config());
    let client = h.connect("s-1", "tenant-1", Role::Tenant).await?;
    h.ctx.connections.disconnect("s-1", "reaped").await;

    // 已在处理途中的 join 晚于断开到达
    h.ctx
        .events
        .dispatch(
            &client.session,
            InboundEvent::JoinProperty(PropertyRoom {
                property_id: "prop-1".to_string(),
            }),
        )
        .await?;

    assert!(!h.ctx.registry.is_online("tenant-1"));
    assert!(h.ctx.router.topics_of("s-1").await.is_empty());
    assert!(h.ctx.router.members_of(&Topic::property("prop-1")).await.is_empty());
    assert_eq!(h.ctx.router.topic_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_connection_with_full_outbound_queue_is_evicted() -> Result<()> {
    let mut config = test_config();
    config.outbound_queue_capacity = 4;
    let h = harness(config);
    let mut stalled = h.connect("s-stalled", "tenant-1", Role::Tenant).await?;
    let mut healthy = h.connect("s-healthy", "tenant-2", Role::Tenant).await?;
    let now = Utc::now();

    // 停滞的客户端从不读取
    for i in 1..=4 {
        let report = h.ctx.heartbeat.tick_at(now + Duration::seconds(i)).await;
        assert_eq!(report.pinged, 2);
        assert_eq!(report.evicted, 0);
        assert_eq!(healthy.events().len(), 1);
    }

    let report = h.ctx.heartbeat.tick_at(now + Duration::seconds(5)).await;
    assert_eq!(report.pinged, 1);
    assert_eq!(report.evicted, 1);
    assert!(!h.ctx.registry.is_online("tenant-1"));
    assert!(h.ctx.registry.is_online("tenant-2"));
    assert!(h.ctx.router.topics_of("s-stalled").await.is_empty());
    assert_eq!(stalled.frames().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_responsive_connection_survives_reaper_ticks() -> Result<()> {
    let h = harness(test_config());
    let mut responsive = h.connect("s-live", "tenant-1", Role::Tenant).await?;
    let _silent = h.connect("s-silent", "tenant-2", Role::Tenant).await?;
    let start = Utc::now();

    for k in 1..=6 {
        let at = start + Duration::seconds(30 * k);
        h.ctx.heartbeat.tick_at(at).await;
        assert!(h.ctx.registry.get("s-live").is_some(), "evicted at tick {k}");

        // 每个 ping 都在一秒内得到 pong
        let pings = responsive
            .events()
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::Ping(_)))
            .count();
        assert_eq!(pings, 1);
        h.ctx.registry.touch_at("s-live", at + Duration::seconds(1))?;
    }

    assert!(h.ctx.registry.get("s-silent").is_none());
    assert_eq!(h.ctx.registry.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_persistence_failure_yields_single_collaborator_error() -> Result<()> {
    let h = harness_with(test_config(), |c| c.persistence = Arc::new(Unavailable));
    let mut agent = h.connect("s-agent", "agent-2", Role::Agent).await?;
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(
        &tenant,
        "user_inquiry",
        json!({ "property_id": "prop-1", "message": "Still available?" }),
    )
    .await;
    let events = tenant.events();
    assert_eq!(events.len(), 1, "unexpected events: {events:?}");
    match &events[0] {
        ServerEvent::Error(notice) => {
            assert_eq!(notice.reason, ErrorCode::CollaboratorUnavailable);
            assert_eq!(notice.event.as_deref(), Some("user_inquiry"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.offline.len("admin").await, 0);

    h.send(
        &tenant,
        "chat_message",
        json!({ "recipient_id": "agent-2", "content": "hello?" }),
    )
    .await;
    let events = tenant.events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_reason(&events[0]), Some(ErrorCode::CollaboratorUnavailable));
    // 未持久化的消息不会投递
    assert!(agent.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_drain_failure_still_admits_and_subscribes() -> Result<()> {
    let h = harness_with(test_config(), |c| c.offline_queue = Arc::new(Unavailable));
    let mut agent = h.connect("s-agent", "agent-1", Role::Agent).await?;

    assert!(h.ctx.registry.is_online("agent-1"));
    let topics = h.ctx.router.topics_of("s-agent").await;
    assert!(topics.contains(&Topic::user("agent-1")));
    assert!(topics.contains(&Topic::lead_activity()));
    assert!(agent.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_scorer_and_analytics_failures_stay_silent() -> Result<()> {
    let h = harness_with(test_config(), |c| {
        c.scorer = Arc::new(Unavailable);
        c.analytics = Arc::new(Unavailable);
    });
    let mut admin = h.connect("s-admin", "admin-1", Role::Admin).await?;
    let mut tenant = h.connect("s-tenant", "tenant-1", Role::Tenant).await?;

    h.send(
        &tenant,
        "lead_activity",
        json!({ "action": "save", "property_id": "prop-2" }),
    )
    .await;
    settle().await;

    let notices = admin.events();
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], ServerEvent::LeadActivity(_)));
    assert!(tenant.events().is_empty());
    assert_eq!(h.persistence.lead_activities().await.len(), 1);
    Ok(())
}
