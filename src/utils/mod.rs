//! 工具函数模块
//!
//! 提供时间戳转换、环境变量解析等通用工具函数

pub mod helpers;

pub use helpers::ServiceHelper;

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 读取字符串环境变量，空值视为未设置
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 读取并解析环境变量
///
/// 无法解析时记录警告并返回 None，由调用方使用配置值或默认值。
pub fn env_parse<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key = %key, value = %raw, error = %err, "ignoring invalid environment value");
            None
        }
    }
}

/// 解析布尔环境变量，接受 true/false/1/0/yes/no
pub fn env_bool(key: &str) -> Option<bool> {
    let raw = env_string(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            warn!(key = %key, value = %raw, "ignoring invalid boolean environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_through_datetime() {
        let now = current_millis();
        let dt = millis_to_datetime(now).unwrap();
        assert_eq!(dt.timestamp_millis(), now);
    }

    #[test]
    fn test_env_parse_ignores_invalid_values() {
        // 每个测试使用独立的键，避免并行测试互相干扰
        unsafe {
            std::env::set_var("HAVEN_UTILS_TEST_PORT", "not-a-number");
            std::env::set_var("HAVEN_UTILS_TEST_TTL", " 120 ");
            std::env::set_var("HAVEN_UTILS_TEST_FLAG", "Yes");
        }

        assert_eq!(env_parse::<u16>("HAVEN_UTILS_TEST_PORT"), None);
        assert_eq!(env_parse::<u64>("HAVEN_UTILS_TEST_TTL"), Some(120));
        assert_eq!(env_bool("HAVEN_UTILS_TEST_FLAG"), Some(true));
        assert_eq!(env_string("HAVEN_UTILS_TEST_UNSET"), None);
    }
}
