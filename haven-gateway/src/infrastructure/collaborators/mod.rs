pub mod in_memory;
pub mod redis;

/// 埋点事件保留条数
pub const ANALYTICS_LIMIT: usize = 10_000;
/// 进程内实现每类记录保留的条数（Redis 中按 TTL 或 LTRIM 淘汰）
pub const RECORD_LIMIT: usize = 10_000;

pub use self::in_memory::{
    InMemoryAgentDirectory, InMemoryAnalyticsSink, InMemoryEventPersistence,
    InMemoryInterestNotifier, InMemoryLeadScorer,
};
pub use self::redis::{
    RedisAgentDirectory, RedisAnalyticsSink, RedisEventPersistence, RedisInterestNotifier,
    RedisLeadScorer, RedisStore,
};
