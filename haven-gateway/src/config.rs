use std::time::Duration as StdDuration;

use chrono::Duration;
use haven_core::config::{HavenAppConfig, RedisPoolConfig};
use haven_core::error::{HavenError, Result};
use haven_core::utils::{env_bool, env_parse, env_string};

use crate::domain::service::RateLimitPolicy;

const DEFAULT_PORT: u16 = 8090;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_EVENTS: u32 = 100;
const DEFAULT_FORGET_DELAY_SECS: u64 = 300;
const DEFAULT_OFFLINE_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_FALLBACK_AGENT: &str = "admin";
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// 时长类配置的上限（一年）
const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

/// 网关最终生效的配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub address: String,
    pub port: u16,
    /// `*` 表示允许任意来源
    pub allowed_origin: String,
    pub token_secret: Option<String>,
    pub token_issuer: Option<String>,
    /// 离线队列与协作方使用的 Redis；未配置时使用进程内实现
    pub redis: Option<RedisPoolConfig>,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_events: u32,
    pub rate_limit_forget_delay_secs: u64,
    pub offline_ttl_secs: u64,
    pub queue_offline_chat: bool,
    pub fallback_agent_id: String,
    /// 每个连接待写出帧的上限
    pub outbound_queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            allowed_origin: "*".to_string(),
            token_secret: None,
            token_issuer: None,
            redis: None,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            rate_limit_max_events: DEFAULT_RATE_LIMIT_MAX_EVENTS,
            rate_limit_forget_delay_secs: DEFAULT_FORGET_DELAY_SECS,
            offline_ttl_secs: DEFAULT_OFFLINE_TTL_SECS,
            queue_offline_chat: false,
            fallback_agent_id: DEFAULT_FALLBACK_AGENT.to_string(),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl GatewayConfig {
    /// 合并配置文件与环境变量（环境变量优先）
    pub fn from_app_config(app: &HavenAppConfig) -> Self {
        let service = app.gateway_service();
        let defaults = Self::default();

        let (file_address, file_port) = match service.server.as_ref() {
            Some(server) => (Some(server.address.clone()), Some(server.port)),
            None => (Some(app.server.address.clone()), Some(app.server.port)),
        };

        let address = env_string("GATEWAY_ADDRESS")
            .or(file_address.filter(|a| !a.is_empty()))
            .unwrap_or(defaults.address);
        let port = env_parse::<u16>("GATEWAY_PORT")
            .or(file_port.filter(|p| *p != 0))
            .unwrap_or(defaults.port);

        let mut redis: Option<RedisPoolConfig> = service
            .offline_queue_store
            .as_deref()
            .and_then(|name| app.redis_profile(name))
            .cloned();

        let env_host = env_string("REDIS_HOST");
        let env_port = env_parse::<u16>("REDIS_PORT");
        let env_password = env_string("REDIS_PASSWORD");
        if env_host.is_some() || env_port.is_some() || env_password.is_some() {
            let profile = redis.get_or_insert_with(RedisPoolConfig::default);
            if env_host.is_some() || env_port.is_some() {
                // 显式的 host/port 覆盖配置文件中的完整 url
                profile.url = None;
            }
            if let Some(host) = env_host {
                profile.host = Some(host);
            }
            if let Some(port) = env_port {
                profile.port = Some(port);
            }
            if let Some(password) = env_password {
                profile.password = Some(password);
            }
        }

        Self {
            address,
            port,
            allowed_origin: env_string("GATEWAY_ALLOWED_ORIGIN")
                .or(service.allowed_origin)
                .unwrap_or(defaults.allowed_origin),
            token_secret: env_string("GATEWAY_TOKEN_SECRET").or(service.token_secret),
            token_issuer: env_string("GATEWAY_TOKEN_ISSUER").or(service.token_issuer),
            heartbeat_interval_secs: env_parse("GATEWAY_HEARTBEAT_INTERVAL_SECS")
                .or(service.heartbeat_interval_secs)
                .filter(|v| *v > 0)
                .unwrap_or(defaults.heartbeat_interval_secs),
            idle_timeout_secs: env_parse("GATEWAY_IDLE_TIMEOUT_SECS")
                .or(service.idle_timeout_secs)
                .filter(|v| *v > 0)
                .unwrap_or(defaults.idle_timeout_secs),
            rate_limit_window_secs: env_parse("GATEWAY_RATE_LIMIT_WINDOW_SECS")
                .or(service.rate_limit_window_secs)
                .filter(|v| *v > 0)
                .unwrap_or(defaults.rate_limit_window_secs),
            rate_limit_max_events: env_parse("GATEWAY_RATE_LIMIT_MAX_EVENTS")
                .or(service.rate_limit_max_events)
                .unwrap_or(defaults.rate_limit_max_events),
            rate_limit_forget_delay_secs: env_parse("GATEWAY_RATE_LIMIT_FORGET_DELAY_SECS")
                .or(service.rate_limit_forget_delay_secs)
                .unwrap_or(defaults.rate_limit_forget_delay_secs),
            offline_ttl_secs: env_parse("GATEWAY_OFFLINE_TTL_SECS")
                .or(service.offline_ttl_secs)
                .or_else(|| redis.as_ref().and_then(|p| p.ttl_seconds))
                .filter(|v| *v > 0)
                .unwrap_or(defaults.offline_ttl_secs),
            queue_offline_chat: env_bool("GATEWAY_QUEUE_OFFLINE_CHAT")
                .or(service.queue_offline_chat)
                .unwrap_or(defaults.queue_offline_chat),
            fallback_agent_id: env_string("GATEWAY_FALLBACK_AGENT_ID")
                .or(service.fallback_agent_id.filter(|id| !id.is_empty()))
                .unwrap_or(defaults.fallback_agent_id),
            outbound_queue_capacity: env_parse::<usize>("GATEWAY_OUTBOUND_QUEUE_CAPACITY")
                .or(service
                    .outbound_queue_capacity
                    .and_then(|v| usize::try_from(v).ok()))
                .filter(|v| *v > 0)
                .unwrap_or(defaults.outbound_queue_capacity),
            redis,
        }
    }

    /// 启动前校验必填项
    pub fn validate(&self) -> Result<()> {
        match self.token_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {}
            _ => {
                return Err(HavenError::Config(
                    "token secret is required (GATEWAY_TOKEN_SECRET)".to_string(),
                ));
            }
        }
        if self.idle_timeout_secs < self.heartbeat_interval_secs {
            return Err(HavenError::Config(format!(
                "idle timeout ({}s) must not be shorter than heartbeat interval ({}s)",
                self.idle_timeout_secs, self.heartbeat_interval_secs
            )));
        }

        let durations = [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
            ("rate_limit_forget_delay_secs", self.rate_limit_forget_delay_secs),
            ("offline_ttl_secs", self.offline_ttl_secs),
        ];
        for (name, value) in durations {
            if value > MAX_DURATION_SECS {
                return Err(HavenError::Config(format!(
                    "{name} ({value}s) exceeds the maximum of {MAX_DURATION_SECS}s"
                )));
            }
        }
        if self.heartbeat_interval_secs == 0 || self.rate_limit_window_secs == 0 {
            return Err(HavenError::Config(
                "heartbeat interval and rate limit window must be positive".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(HavenError::Config(
                "outbound queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window: Duration::seconds(self.rate_limit_window_secs as i64),
            max_events: self.rate_limit_max_events,
        }
    }

    pub fn heartbeat_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::seconds(self.idle_timeout_secs as i64)
    }

    pub fn forget_delay(&self) -> StdDuration {
        StdDuration::from_secs(self.rate_limit_forget_delay_secs)
    }

    pub fn offline_ttl(&self) -> Duration {
        Duration::seconds(self.offline_ttl_secs as i64)
    }

    pub fn redis_namespace(&self) -> String {
        self.redis
            .as_ref()
            .map(|p| p.namespace().to_string())
            .unwrap_or_else(|| "haven".to_string())
    }
}
