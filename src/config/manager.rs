//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! - 读取当前环境名称（`HAVEN_ENV`）
//! - 加载 `config/environments/{env}.toml` 并合并到已加载的配置

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::Value;

use super::{HavenAppConfig, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 HAVEN_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("HAVEN_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 文件不存在时保持原配置不变。
    pub fn load_environment_config(base_config: &mut HavenAppConfig) -> Result<()> {
        let path = PathBuf::from(format!(
            "config/environments/{}.toml",
            Self::get_environment()
        ));
        Self::apply_overlay_file(base_config, &path)
    }

    /// 将指定 TOML 文件覆盖到配置上
    pub fn apply_overlay_file(base_config: &mut HavenAppConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取环境配置文件: {}", path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", path.display()))?;

        Self::apply_overlay(base_config, overlay)
    }

    /// 将覆盖值合并到配置上
    ///
    /// 先将当前配置还原为 TOML 值，合并后重新反序列化。
    pub fn apply_overlay(base_config: &mut HavenAppConfig, overlay: Value) -> Result<()> {
        let mut merged = Value::Table(ConfigSnapshot::from(&*base_config).into_table());
        merge_value(&mut merged, overlay);

        let cfg: HavenAppConfig = merged.try_into().context("合并环境配置后格式无效")?;
        *base_config = cfg;
        Ok(())
    }
}

/// 配置快照，仅用于覆盖合并
struct ConfigSnapshot {
    server: toml::Table,
    logging: toml::Table,
    redis: toml::Table,
    services: toml::Table,
}

impl ConfigSnapshot {
    fn into_table(self) -> toml::Table {
        let mut root = toml::Table::new();
        root.insert("server".into(), Value::Table(self.server));
        root.insert("logging".into(), Value::Table(self.logging));
        root.insert("redis".into(), Value::Table(self.redis));
        root.insert("services".into(), Value::Table(self.services));
        root
    }
}

impl From<&HavenAppConfig> for ConfigSnapshot {
    fn from(cfg: &HavenAppConfig) -> Self {
        let mut server = toml::Table::new();
        server.insert("address".into(), Value::String(cfg.server.address.clone()));
        server.insert("port".into(), Value::Integer(cfg.server.port as i64));

        let mut logging = toml::Table::new();
        logging.insert("level".into(), Value::String(cfg.logging.level.clone()));
        logging.insert("format".into(), Value::String(cfg.logging.format.clone()));
        logging.insert("with_target".into(), Value::Boolean(cfg.logging.with_target));
        logging.insert(
            "with_thread_ids".into(),
            Value::Boolean(cfg.logging.with_thread_ids),
        );
        logging.insert("with_file".into(), Value::Boolean(cfg.logging.with_file));
        logging.insert(
            "with_line_number".into(),
            Value::Boolean(cfg.logging.with_line_number),
        );

        let mut redis = toml::Table::new();
        for (name, profile) in &cfg.redis {
            let mut table = toml::Table::new();
            insert_opt(&mut table, "url", profile.url.clone().map(Value::String));
            insert_opt(&mut table, "host", profile.host.clone().map(Value::String));
            insert_opt(
                &mut table,
                "port",
                profile.port.map(|p| Value::Integer(p as i64)),
            );
            insert_opt(
                &mut table,
                "password",
                profile.password.clone().map(Value::String),
            );
            insert_opt(
                &mut table,
                "database",
                profile.database.map(|d| Value::Integer(d as i64)),
            );
            insert_opt(
                &mut table,
                "namespace",
                profile.namespace.clone().map(Value::String),
            );
            insert_opt(
                &mut table,
                "ttl_seconds",
                profile.ttl_seconds.map(|t| Value::Integer(t as i64)),
            );
            redis.insert(name.clone(), Value::Table(table));
        }

        let mut services = toml::Table::new();
        if let Some(gateway) = cfg.services.gateway.as_ref() {
            services.insert("gateway".into(), Value::Table(gateway_table(gateway)));
        }

        Self {
            server,
            logging,
            redis,
            services,
        }
    }
}

fn gateway_table(gateway: &super::GatewayServiceConfig) -> toml::Table {
    let mut table = toml::Table::new();
    if let Some(server) = gateway.server.as_ref() {
        let mut inner = toml::Table::new();
        inner.insert("address".into(), Value::String(server.address.clone()));
        inner.insert("port".into(), Value::Integer(server.port as i64));
        table.insert("server".into(), Value::Table(inner));
    }
    let strings = [
        ("allowed_origin", &gateway.allowed_origin),
        ("token_secret", &gateway.token_secret),
        ("token_issuer", &gateway.token_issuer),
        ("offline_queue_store", &gateway.offline_queue_store),
        ("fallback_agent_id", &gateway.fallback_agent_id),
    ];
    for (key, value) in strings {
        insert_opt(&mut table, key, value.clone().map(Value::String));
    }
    let numbers = [
        ("heartbeat_interval_secs", gateway.heartbeat_interval_secs),
        ("idle_timeout_secs", gateway.idle_timeout_secs),
        ("rate_limit_window_secs", gateway.rate_limit_window_secs),
        (
            "rate_limit_max_events",
            gateway.rate_limit_max_events.map(u64::from),
        ),
        (
            "rate_limit_forget_delay_secs",
            gateway.rate_limit_forget_delay_secs,
        ),
        ("offline_ttl_secs", gateway.offline_ttl_secs),
        ("outbound_queue_capacity", gateway.outbound_queue_capacity),
    ];
    for (key, value) in numbers {
        insert_opt(&mut table, key, value.map(|v| Value::Integer(v as i64)));
    }
    insert_opt(
        &mut table,
        "queue_offline_chat",
        gateway.queue_offline_chat.map(Value::Boolean),
    );
    table
}

fn insert_opt(table: &mut toml::Table, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        table.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayServiceConfig, RedisPoolConfig, ServicesConfig};

    #[test]
    fn test_overlay_replaces_only_given_keys() {
        let mut cfg = HavenAppConfig::default();
        cfg.server.port = 8090;
        cfg.redis.insert(
            "offline".to_string(),
            RedisPoolConfig {
                host: Some("localhost".to_string()),
                port: Some(6379),
                ..Default::default()
            },
        );
        cfg.services = ServicesConfig {
            gateway: Some(GatewayServiceConfig {
                heartbeat_interval_secs: Some(30),
                offline_queue_store: Some("offline".to_string()),
                ..Default::default()
            }),
        };

        let overlay: Value = toml::from_str(
            r#"
[redis.offline]
host = "redis.prod"

[services.gateway]
idle_timeout_secs = 90
"#,
        )
        .unwrap();

        ConfigManager::apply_overlay(&mut cfg, overlay).unwrap();

        assert_eq!(cfg.server.port, 8090);
        let redis = cfg.redis_profile("offline").unwrap();
        assert_eq!(redis.host.as_deref(), Some("redis.prod"));
        assert_eq!(redis.port, Some(6379));
        let gateway = cfg.gateway_service();
        assert_eq!(gateway.heartbeat_interval_secs, Some(30));
        assert_eq!(gateway.idle_timeout_secs, Some(90));
        assert_eq!(gateway.offline_queue_store.as_deref(), Some("offline"));
    }

    #[test]
    fn test_missing_overlay_file_is_noop() {
        let mut cfg = HavenAppConfig::default();
        ConfigManager::apply_overlay_file(&mut cfg, Path::new("/nonexistent/env.toml")).unwrap();
        assert!(cfg.redis.is_empty());
    }
}
