//! # JWT 认证
//!
//! 校验握手时携带的 HS256 令牌（签名、过期时间、可选发行方），提取用户与角色。

use async_trait::async_trait;
use chrono::Utc;
use haven_core::error::{HavenError, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::models::{Principal, Role};
use crate::domain::repositories::Authenticator;

/// Token Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 用户ID
    #[serde(alias = "user_id", alias = "userId")]
    pub sub: String,
    /// 角色，缺失时视为 guest
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// 过期时间（Unix时间戳）
    pub exp: i64,
}

/// JWT 认证器
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        if let Some(iss) = issuer.as_deref() {
            validation.set_issuer(&[iss]);
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
        }
    }

    /// 签发令牌（开发与测试使用）
    pub fn issue(&self, user_id: &str, role: Role, ttl_seconds: i64) -> Result<String> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            role: Some(role.as_str().to_string()),
            iss: self.issuer.clone(),
            exp: Utc::now().timestamp() + ttl_seconds,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| HavenError::Internal(format!("token encoding failed: {err}")))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify(&self, credential: &str) -> Result<Principal> {
        let token = credential.trim();
        if token.is_empty() {
            return Err(HavenError::AuthenticationFailed(
                "missing credential".to_string(),
            ));
        }

        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| HavenError::AuthenticationFailed(err.to_string()))?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(HavenError::AuthenticationFailed(
                "token has no subject".to_string(),
            ));
        }

        let role = claims
            .role
            .as_deref()
            .map(Role::parse)
            .unwrap_or(Role::Guest);

        debug!(user_id = %claims.sub, role = %role, "token authenticated");
        Ok(Principal::new(claims.sub, role))
    }
}
