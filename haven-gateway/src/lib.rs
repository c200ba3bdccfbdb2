//! 租房平台实时网关
//!
//! 负责 WebSocket 接入认证、连接注册、主题路由、离线消息与心跳清理。

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use config::GatewayConfig;
pub use service::{ApplicationBootstrap, ApplicationContext};
