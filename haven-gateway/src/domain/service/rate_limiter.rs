//! 按用户的固定窗口限流器

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// 限流策略
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_events: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::seconds(60),
            max_events: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// 限流器
///
/// 从不返回错误；拒绝时由调用方向客户端发送 `RateLimitExceeded`。
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn allow(&self, user_id: &str) -> bool {
        self.allow_at(user_id, Utc::now())
    }

    /// 窗口到期时先重置计数，再按新窗口判定本次请求
    pub fn allow_at(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let mut window = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now + self.policy.window,
            });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.policy.window;
        }

        if window.count < self.policy.max_events {
            window.count += 1;
            true
        } else {
            false
        }
    }

    pub fn forget(&self, user_id: &str) {
        self.windows.remove(user_id);
    }

    pub fn is_tracked(&self, user_id: &str) -> bool {
        self.windows.contains_key(user_id)
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denies_after_ceiling_until_rollover() {
        let limiter = RateLimiter::new(RateLimitPolicy {
            window: Duration::seconds(60),
            max_events: 3,
        });
        let start = Utc::now();

        for i in 0..3 {
            assert!(limiter.allow_at("u1", start + Duration::seconds(i)));
        }
        assert!(!limiter.allow_at("u1", start + Duration::seconds(10)));
        assert!(!limiter.allow_at("u1", start + Duration::seconds(59)));

        // 新窗口的第一个请求
        assert!(limiter.allow_at("u1", start + Duration::seconds(60)));
        assert!(limiter.allow_at("u1", start + Duration::seconds(61)));
    }

    #[test]
    fn test_users_are_isolated() {
        let limiter = RateLimiter::new(RateLimitPolicy {
            window: Duration::seconds(60),
            max_events: 1,
        });
        let now = Utc::now();
        assert!(limiter.allow_at("u1", now));
        assert!(!limiter.allow_at("u1", now));
        assert!(limiter.allow_at("u2", now));
    }

    #[test]
    fn test_forget_resets_state() {
        let limiter = RateLimiter::new(RateLimitPolicy {
            window: Duration::seconds(60),
            max_events: 1,
        });
        let now = Utc::now();
        assert!(limiter.allow_at("u1", now));
        assert!(!limiter.allow_at("u1", now));

        limiter.forget("u1");
        assert!(!limiter.is_tracked("u1"));
        assert!(limiter.allow_at("u1", now));
    }

    #[test]
    fn test_default_policy() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        let allowed = (0..101).filter(|_| limiter.allow_at("u1", now)).count();
        assert_eq!(allowed, 100);
        assert_eq!(limiter.tracked_users(), 1);
    }
}
