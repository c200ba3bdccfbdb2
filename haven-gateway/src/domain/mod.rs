pub mod events;
pub mod models;
pub mod repositories;
pub mod service;

pub use events::{ClientFrame, InboundEvent, OutboundFrame, ServerEvent};
pub use models::{ConnectionInfo, ConnectionPhase, Principal, QueuedMessage, Role, Topic};
pub use repositories::{
    AgentDirectory, AnalyticsSink, Authenticator, EventPersistence, InterestNotifier, LeadScorer,
    OfflineMessageQueue,
};
pub use service::{ConnectionRegistry, RateLimitPolicy, RateLimiter, TopicRouter};
