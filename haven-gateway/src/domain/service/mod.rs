pub mod rate_limiter;
pub mod registry;
pub mod topic_router;

pub use rate_limiter::{RateLimitPolicy, RateLimiter};
pub use registry::{ConnectionRegistry, OutboundReceiver, OutboundSender, outbound_channel};
pub use topic_router::TopicRouter;
