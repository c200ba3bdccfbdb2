//! # 日志初始化模块
//!
//! 为各个服务提供统一的 tracing-subscriber 初始化。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// 优先使用环境变量 `RUST_LOG`，否则使用配置中的级别；未提供配置时使用 info 级别、文本格式。
/// 重复初始化时静默忽略（测试中多次调用）。
///
/// # 示例
/// ```rust,ignore
/// use haven_core::config::LoggingConfig;
///
/// init_tracing_from_config(None);
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: "json".to_string(),
///     ..Default::default()
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    let result = if config.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already initialised: {err}");
    }
}

/// 在临时的 stderr 订阅者下执行 `f`
///
/// 全局订阅者依赖配置中的日志设置，配置加载期间的告警通过这里输出。
pub fn with_bootstrap_logging<T>(f: impl FnOnce() -> T) -> T {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    ::tracing::subscriber::with_default(subscriber, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_logging_captures_warnings() {
        let enabled = with_bootstrap_logging(|| ::tracing::enabled!(::tracing::Level::WARN));
        assert!(enabled);
        assert_eq!(with_bootstrap_logging(|| 7), 7);
    }
}
