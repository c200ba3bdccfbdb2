pub mod in_memory;
pub mod redis;

pub use self::in_memory::InMemoryOfflineQueue;
pub use self::redis::RedisOfflineQueue;
