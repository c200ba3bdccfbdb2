//! Haven 错误工具模块
//!
//! - 定义对客户端暴露的稳定错误码 `ErrorCode`
//! - 定义网关内部统一错误类型 `HavenError`
//! - 为基础设施层提供 `InfraResult` -> `Result` 的便捷转换

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 对外错误码
///
/// 序列化后的字符串是客户端可依赖的稳定取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    AuthenticationFailed,
    RateLimitExceeded,
    ValidationError,
    Unauthorized,
    CollaboratorUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AuthenticationFailed",
            ErrorCode::RateLimitExceeded => "RateLimitExceeded",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::CollaboratorUnavailable => "CollaboratorUnavailable",
            ErrorCode::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 网关统一错误类型
#[derive(Debug, Error)]
pub enum HavenError {
    /// 握手凭证缺失、签名错误或已过期
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 当前窗口内事件数已达上限
    #[error("rate limit exceeded for user {user_id}")]
    RateLimitExceeded { user_id: String },

    /// 事件负载缺少字段或格式错误
    #[error("validation error: {0}")]
    Validation(String),

    /// 角色权限不足
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 外部协作方（持久化、队列、目录等）调用失败
    #[error("collaborator {collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("session {0} already registered")]
    DuplicateSession(String),

    #[error("session {0} not registered")]
    UnknownSession(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HavenError {
    pub fn validation(message: impl Into<String>) -> Self {
        HavenError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        HavenError::Unauthorized(message.into())
    }

    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        HavenError::CollaboratorUnavailable {
            collaborator,
            message: message.into(),
        }
    }

    /// 映射到对外错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            HavenError::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            HavenError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            HavenError::Validation(_) => ErrorCode::ValidationError,
            HavenError::Unauthorized(_) => ErrorCode::Unauthorized,
            HavenError::CollaboratorUnavailable { .. } => ErrorCode::CollaboratorUnavailable,
            HavenError::DuplicateSession(_)
            | HavenError::UnknownSession(_)
            | HavenError::Config(_)
            | HavenError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// 可以安全发送给客户端的错误描述
    ///
    /// 协作方与内部错误只暴露笼统描述，不泄露底层细节。
    pub fn client_message(&self) -> String {
        match self {
            HavenError::AuthenticationFailed(_) => "invalid or expired credential".to_string(),
            HavenError::RateLimitExceeded { .. } => {
                "too many events, please slow down".to_string()
            }
            HavenError::Validation(message) | HavenError::Unauthorized(message) => {
                message.clone()
            }
            HavenError::CollaboratorUnavailable { .. } => {
                "service temporarily unavailable, please retry".to_string()
            }
            HavenError::DuplicateSession(_)
            | HavenError::UnknownSession(_)
            | HavenError::Config(_)
            | HavenError::Internal(_) => "internal error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HavenError>;

/// 基础设施层结果类型（anyhow 携带上下文）
pub type InfraResult<T> = anyhow::Result<T>;

/// 将基础设施错误转换为协作方不可用错误
pub trait InfraResultExt<T> {
    fn into_collaborator(self, collaborator: &'static str) -> Result<T>;
}

impl<T> InfraResultExt<T> for InfraResult<T> {
    fn into_collaborator(self, collaborator: &'static str) -> Result<T> {
        self.map_err(|err| HavenError::collaborator(collaborator, format!("{err:#}")))
    }
}

impl From<redis::RedisError> for HavenError {
    fn from(err: redis::RedisError) -> Self {
        HavenError::collaborator("redis", err.to_string())
    }
}

impl From<serde_json::Error> for HavenError {
    fn from(err: serde_json::Error) -> Self {
        HavenError::Validation(err.to_string())
    }
}
