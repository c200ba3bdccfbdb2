//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建协作方、领域服务、应用服务与路由状态

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result, anyhow};
use haven_core::metrics::GatewayMetrics;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use crate::application::{
    Collaborators, ConnectionService, EventPolicy, GatewayEventHandler, HeartbeatService,
};
use crate::config::GatewayConfig;
use crate::domain::repositories::AuthenticatorRef;
use crate::domain::service::{ConnectionRegistry, RateLimiter, TopicRouter};
use crate::infrastructure::JwtAuthenticator;
use crate::infrastructure::collaborators::{
    InMemoryAgentDirectory, InMemoryAnalyticsSink, InMemoryEventPersistence,
    InMemoryInterestNotifier, InMemoryLeadScorer, RedisAgentDirectory, RedisAnalyticsSink,
    RedisEventPersistence, RedisInterestNotifier, RedisLeadScorer, RedisStore,
};
use crate::infrastructure::offline_queue::{InMemoryOfflineQueue, RedisOfflineQueue};
use crate::interface::GatewayState;

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub router: Arc<TopicRouter>,
    pub connections: Arc<ConnectionService>,
    pub events: Arc<GatewayEventHandler>,
    pub heartbeat: Arc<HeartbeatService>,
    pub authenticator: AuthenticatorRef,
    pub metrics: Arc<GatewayMetrics>,
}

impl ApplicationContext {
    /// 构建 HTTP 路由共享状态
    pub fn gateway_state(&self) -> GatewayState {
        GatewayState {
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            connections: Arc::clone(&self.connections),
            events: Arc::clone(&self.events),
            authenticator: Arc::clone(&self.authenticator),
            metrics: Arc::clone(&self.metrics),
            allowed_origin: Arc::from(self.config.allowed_origin.as_str()),
        }
    }
}

/// 进程内协作方，未配置 Redis 或 Redis 不可用时使用
pub fn in_memory_collaborators() -> Collaborators {
    Collaborators {
        persistence: Arc::new(InMemoryEventPersistence::new()),
        agents: Arc::new(InMemoryAgentDirectory::new()),
        notifier: Arc::new(InMemoryInterestNotifier::new()),
        scorer: Arc::new(InMemoryLeadScorer::new()),
        analytics: Arc::new(InMemoryAnalyticsSink::new()),
        offline_queue: Arc::new(InMemoryOfflineQueue::new()),
    }
}

/// 基于 Redis 构建协作方
pub async fn redis_collaborators(config: &GatewayConfig) -> Result<Collaborators> {
    let profile = config
        .redis
        .as_ref()
        .ok_or_else(|| anyhow!("redis is not configured"))?;
    let url = profile.connection_url();

    let client = redis::Client::open(url.as_str())
        .with_context(|| "Failed to create Redis client")?;
    let conn = ConnectionManager::new(client)
        .await
        .with_context(|| "Failed to connect to Redis")?;

    let namespace = config.redis_namespace();
    let store = RedisStore::new(conn.clone(), namespace.clone());

    Ok(Collaborators {
        persistence: Arc::new(RedisEventPersistence::new(store.clone())),
        agents: Arc::new(RedisAgentDirectory::new(store.clone())),
        notifier: Arc::new(RedisInterestNotifier::new(store.clone())),
        scorer: Arc::new(RedisLeadScorer::new(store.clone())),
        analytics: Arc::new(RedisAnalyticsSink::new(store)),
        offline_queue: Arc::new(RedisOfflineQueue::new(conn, namespace)),
    })
}

/// 按配置选择协作方；Redis 连接失败时降级为进程内实现
pub async fn build_collaborators(config: &GatewayConfig) -> Collaborators {
    if config.redis.is_none() {
        info!("redis not configured, using in-process collaborators");
        return in_memory_collaborators();
    }

    match redis_collaborators(config).await {
        Ok(collaborators) => {
            info!(namespace = %config.redis_namespace(), "redis collaborators ready");
            collaborators
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "redis unavailable, offline messages will not survive restarts");
            in_memory_collaborators()
        }
    }
}

/// 构建应用上下文
///
/// 类似 Go Wire 的 Initialize 函数，按照依赖顺序构建所有组件
pub fn initialize(config: GatewayConfig, collaborators: Collaborators) -> Result<ApplicationContext> {
    config
        .validate()
        .map_err(|err| anyhow!("invalid gateway configuration: {err}"))?;
    let config = Arc::new(config);

    // 1. 认证
    let secret = config.token_secret.clone().unwrap_or_default();
    let authenticator: AuthenticatorRef = Arc::new(JwtAuthenticator::new(
        &secret,
        config.token_issuer.clone(),
    ));

    // 2. 领域服务
    let metrics = Arc::new(GatewayMetrics::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_policy()));
    let router = Arc::new(TopicRouter::new(Arc::clone(&registry)));

    // 3. 应用服务
    let connections = Arc::new(ConnectionService::new(
        Arc::clone(&registry),
        Arc::clone(&limiter),
        Arc::clone(&router),
        Arc::clone(&collaborators.offline_queue),
        config.forget_delay(),
        config.outbound_queue_capacity,
        Arc::clone(&metrics),
    ));

    let policy = EventPolicy {
        offline_ttl: config.offline_ttl(),
        queue_offline_chat: config.queue_offline_chat,
        fallback_agent_id: config.fallback_agent_id.clone(),
    };
    let events = Arc::new(GatewayEventHandler::new(
        Arc::clone(&registry),
        Arc::clone(&limiter),
        Arc::clone(&router),
        collaborators,
        policy,
        Arc::clone(&metrics),
    ));

    let heartbeat = Arc::new(HeartbeatService::new(
        Arc::clone(&registry),
        Arc::clone(&connections),
        config.heartbeat_interval(),
        config.idle_timeout(),
        Arc::clone(&metrics),
    ));

    Ok(ApplicationContext {
        config,
        registry,
        limiter,
        router,
        connections,
        events,
        heartbeat,
        authenticator,
        metrics,
    })
}
