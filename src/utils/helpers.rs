//! 辅助工具函数模块
//!
//! 提供配置加载、服务地址解析等启动辅助函数

use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::config::HavenAppConfig;

/// 服务启动辅助函数
pub struct ServiceHelper;

impl ServiceHelper {
    /// 加载配置
    ///
    /// 路径优先取参数，其次取环境变量 `HAVEN_CONFIG`。
    /// 此时全局日志尚未初始化，加载过程中的告警输出到 stderr。
    pub fn load_config(config_path: Option<&str>) -> &'static HavenAppConfig {
        let from_env = super::env_string("HAVEN_CONFIG");
        let path = config_path.or(from_env.as_deref());
        crate::tracing::with_bootstrap_logging(|| crate::config::load_config(path))
    }

    /// 解析监听地址
    pub fn parse_server_addr(address: &str, port: u16) -> Result<SocketAddr> {
        let addr = format!("{address}:{port}")
            .parse()
            .with_context(|| format!("invalid server address: {address}:{port}"))?;
        Ok(addr)
    }

    /// 从应用默认 server 配置解析监听地址
    pub fn parse_default_server_addr(config: &HavenAppConfig) -> Result<SocketAddr> {
        Self::parse_server_addr(&config.server.address, config.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_addr() {
        let addr = ServiceHelper::parse_server_addr("127.0.0.1", 8090).unwrap();
        assert_eq!(addr.port(), 8090);
        assert!(ServiceHelper::parse_server_addr("not an ip", 8090).is_err());
    }
}
