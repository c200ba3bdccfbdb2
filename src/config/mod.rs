//! Haven 配置模块
//!
//! 该模块提供应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或 `config/` 目录分片合并）
//! - 环境特定配置覆盖
//! - 服务、日志与 Redis 配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<HavenAppConfig> = OnceLock::new();

/// 服务器监听配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: 0,
        }
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace/debug/info/warn/error 或 EnvFilter 表达式）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 输出格式：text 或 json
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

/// Redis 连接配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// 完整连接地址（优先使用）
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password: Option<String>,
    /// 数据库编号
    #[serde(default)]
    pub database: Option<u32>,
    /// 键命名空间前缀
    #[serde(default)]
    pub namespace: Option<String>,
    /// 过期时间（秒）
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl RedisPoolConfig {
    /// 生成连接地址
    ///
    /// 配置了 `url` 时直接使用，否则由 host/port/password/database 拼接。
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            return url.clone();
        }

        let host = self.host.as_deref().unwrap_or("127.0.0.1");
        let port = self.port.unwrap_or(6379);
        let auth = match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!(":{password}@"),
            _ => String::new(),
        };
        let database = self
            .database
            .map(|db| format!("/{db}"))
            .unwrap_or_default();

        format!("redis://{auth}{host}:{port}{database}")
    }

    /// 键命名空间前缀，默认 `haven`
    pub fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or("haven")
    }
}

/// 实时网关服务配置
///
/// 所有字段均可选，最终取值由网关服务结合环境变量解析。
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayServiceConfig {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// 允许跨域连接的 Origin，`*` 表示不限制
    #[serde(default)]
    pub allowed_origin: Option<String>,
    /// 令牌签名密钥
    #[serde(default)]
    pub token_secret: Option<String>,
    /// 令牌发行方
    #[serde(default)]
    pub token_issuer: Option<String>,
    /// 离线消息队列与协作方使用的 Redis 配置名
    #[serde(default)]
    pub offline_queue_store: Option<String>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit_window_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit_max_events: Option<u32>,
    #[serde(default)]
    pub rate_limit_forget_delay_secs: Option<u64>,
    /// 离线消息过期时间（秒）
    #[serde(default)]
    pub offline_ttl_secs: Option<u64>,
    /// 收件人离线时是否也将聊天消息写入离线队列
    #[serde(default)]
    pub queue_offline_chat: Option<bool>,
    /// 未找到可用经纪人时的咨询兜底接收人
    #[serde(default)]
    pub fallback_agent_id: Option<String>,
    /// 每个连接待写出帧的上限，写满后连接被剔除
    #[serde(default)]
    pub outbound_queue_capacity: Option<u64>,
}

/// 服务配置集合
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub gateway: Option<GatewayServiceConfig>,
}

/// Haven 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HavenAppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis 配置映射
    #[serde(default)]
    pub redis: HashMap<String, RedisPoolConfig>,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl HavenAppConfig {
    /// 获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 获取网关服务配置
    pub fn gateway_service(&self) -> GatewayServiceConfig {
        self.services.gateway.clone().unwrap_or_default()
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.server.address.is_empty() {
            self.server.address = default_address();
        }
        if self.server.port == 0 {
            self.server.port = 8090;
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static HavenAppConfig {
    APP_CONFIG.get_or_init(|| load_config_uncached(path))
}

/// 获取已加载的应用配置，未加载时返回 None
pub fn app_config() -> Option<&'static HavenAppConfig> {
    APP_CONFIG.get()
}

/// 不经过全局缓存加载一次配置（测试与工具使用）
pub fn load_config_uncached(path: Option<&str>) -> HavenAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    let mut cfg = load_with_fallback(&candidates);
    if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
        warn!("failed to load environment config: {:#}", e);
    }
    cfg
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> HavenAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    default_config()
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> Result<HavenAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

fn load_config_from_file(path: &Path) -> Result<HavenAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: HavenAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置
///
/// `base.toml` 为基础，依次合并 `shared/`、`services/`、`overrides/` 下的片段。
fn load_config_from_directory(path: &Path) -> Result<HavenAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: HavenAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort();

    for entry in entries {
        let value = load_toml_value(&entry)?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 递归合并：表按键合并，其余值由覆盖方替换
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

/// 默认配置
fn default_config() -> HavenAppConfig {
    let mut cfg = HavenAppConfig::default();
    cfg.ensure_defaults();
    cfg
}
