//! 会话上下文
//!
//! 会话 token 是后端签发的 JWT，这里只解码载荷读取身份信息，不校验签名。
//! 登录 / 登出通过 [`SessionStore`] 显式管理，没有全局单例。

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{OrderTrackingError, Result};
use crate::http_client::OrdersHttpClient;
use crate::route_guard::Role;

/// 从 token 载荷解码出的身份信息
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 一次登录会话
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    token: String,
    pub claims: SessionClaims,
}

impl SessionContext {
    /// 解码 `header.payload.signature` 中的 payload
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|part| !part.is_empty())
            .ok_or_else(|| OrderTrackingError::InvalidInput("会话 token 格式错误".to_string()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(payload))
            .map_err(|e| OrderTrackingError::InvalidInput(format!("会话 token 解码失败: {}", e)))?;
        let value: Value = serde_json::from_slice(&bytes)?;

        Ok(Self {
            token: token.to_string(),
            claims: claims_from(&value),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn role(&self) -> Role {
        self.claims.role
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.claims.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

fn string_claim(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match value.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// `role` / `roles` 既可能是字符串也可能是数组，数组取第一个
fn role_claim(value: &Value) -> Role {
    ["roles", "role"]
        .iter()
        .find_map(|key| match value.get(key) {
            Some(Value::String(s)) => Some(Role::parse(s)),
            Some(Value::Array(items)) => items.iter().find_map(Value::as_str).map(Role::parse),
            _ => None,
        })
        .unwrap_or_default()
}

fn claims_from(value: &Value) -> SessionClaims {
    SessionClaims {
        user_id: string_claim(value, &["id", "sub", "userId"]),
        name: string_claim(value, &["name"]),
        role: role_claim(value),
        expires_at: value
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
    }
}

/// 会话存储
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<SessionContext>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存后端签发的 token
    pub fn login(&self, token: &str) -> Result<SessionContext> {
        let session = SessionContext::from_token(token)?;
        info!(
            "🔑 已登录: {} ({})",
            session.claims.name,
            session.claims.role
        );
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    /// 用邮箱密码登录，成功后 HTTP 客户端也会带上会话 token
    pub async fn sign_in(
        &self,
        client: &OrdersHttpClient,
        email: &str,
        password: &str,
    ) -> Result<SessionContext> {
        let token = client.login(email, password).await?.into_token()?;
        let session = self.login(&token)?;
        client.set_session_token(Some(token));
        Ok(session)
    }

    pub fn logout(&self) {
        if self.current.write().take().is_some() {
            info!("👋 已登出");
        }
    }

    /// 当前会话；已过期的会话视为不存在
    pub fn current(&self) -> Option<SessionContext> {
        let session = self.current.read().clone()?;
        if session.is_expired_at(Utc::now()) {
            warn!("会话已过期");
            return None;
        }
        Some(session)
    }

    pub fn token(&self) -> Option<String> {
        self.current().map(|session| session.token)
    }

    /// 当前角色，未登录为 Public
    pub fn role(&self) -> Role {
        self.current().map(|session| session.role()).unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use super::*;

    /// 生成未签名的测试 token
    pub fn token_with(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }
}
