//! Haven Core 公共库
//!
//! 提供统一的配置加载、错误类型、指标与日志初始化功能

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, GatewayServiceConfig, HavenAppConfig, LoggingConfig, RedisPoolConfig,
    ServerConfig, ServicesConfig, app_config, load_config,
};
pub use error::*;
pub use utils::*;
