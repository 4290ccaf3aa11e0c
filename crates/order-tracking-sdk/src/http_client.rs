//! HTTP 客户端模块 - 订单 REST API 与轮询代理
//!
//! 使用 reqwest 作为底层 HTTP 客户端：
//! - 订单增删改查（`{backend}/orders`）
//! - 登录（`{backend}/auth/login`）
//! - 轮询快照（轮询代理或直接 `{backend}/orders`），实现 [`SnapshotSource`]

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{HttpClientConfig, TrackingConfig};
use crate::error::{OrderTrackingError, Result};
use crate::models::{Order, OrderDraft, OrderPatch};
use crate::sync::polling::SnapshotSource;
use crate::version;

/// 会话 cookie 名
pub const SESSION_COOKIE: &str = "session";

/// 登录请求体
#[derive(Debug, Clone, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// 登录返回的用户信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
}

/// 登录响应（POST /auth/login）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<LoginUser>,
}

impl LoginResponse {
    /// 取出会话 token，登录失败时返回认证错误
    pub fn into_token(self) -> Result<String> {
        match (self.success, self.token) {
            (true, Some(token)) if !token.is_empty() => Ok(token),
            _ => Err(OrderTrackingError::Unauthorized(
                "Invalid Credentials".to_string(),
            )),
        }
    }
}

/// 订单 HTTP 客户端
pub struct OrdersHttpClient {
    client: Client,
    base_url: String,
    /// 轮询代理地址；未设置时直接轮询 `{base_url}/orders`
    poll_url: Option<String>,
    session_token: RwLock<Option<String>>,
}

impl OrdersHttpClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &HttpClientConfig, base_url: impl Into<String>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| OrderTrackingError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("✅ HTTP 客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            poll_url: None,
            session_token: RwLock::new(None),
        })
    }

    /// 按 SDK 配置创建（轮询代理地址与会话 token 一并带上）
    pub fn from_config(config: &TrackingConfig) -> Result<Self> {
        let mut client = Self::new(&config.http_client_config, config.backend_url_or_default())?;
        client.poll_url = config.poll_url.clone();
        client.set_session_token(config.session_token.clone());
        Ok(client)
    }

    pub fn with_poll_url(mut self, url: impl Into<String>) -> Self {
        self.poll_url = Some(url.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 更新会话 token（登录 / 登出后调用）
    pub fn set_session_token(&self, token: Option<String>) {
        *self.session_token.write() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 非 2xx 响应转换为错误（401 → Unauthorized）
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        let message = if body.is_empty() {
            "Error fetching data".to_string()
        } else {
            body
        };
        error!("❌ HTTP 请求失败，状态码: {}, 错误: {}", status, message);
        Err(OrderTrackingError::from_status(status, message))
    }

    /// 获取全部订单
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        let response = self.client.get(self.url("/orders")).send().await?;
        let orders: Vec<Order> = Self::check(response).await?.json().await?;
        debug!("获取订单列表: {} 条", orders.len());
        Ok(orders)
    }

    /// 获取单个订单
    pub async fn get_order(&self, id: &str) -> Result<Order> {
        let response = self
            .client
            .get(self.url(&format!("/orders/{}", id)))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// 创建订单
    pub async fn create_order(&self, draft: &OrderDraft) -> Result<Order> {
        let response = self
            .client
            .post(self.url("/orders"))
            .json(draft)
            .send()
            .await?;
        let order: Order = Self::check(response).await?.json().await?;
        info!("📝 订单已创建: {}", order.short_id());
        Ok(order)
    }

    /// 局部更新订单
    pub async fn update_order(&self, id: &str, patch: &OrderPatch) -> Result<Order> {
        let response = self
            .client
            .patch(self.url(&format!("/orders/{}", id)))
            .json(patch)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// 删除订单
    pub async fn delete_order(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/orders/{}", id)))
            .send()
            .await?;
        Self::check(response).await?;
        info!("🗑️ 订单已删除: {}", id);
        Ok(())
    }

    /// 登录，返回后端原始响应
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(OrderTrackingError::InvalidInput(
                "Please enter a valid email.".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                email,
                password: password.trim(),
            })
            .send()
            .await?;
        // 登录失败时后端返回 success=false，不一定是非 2xx
        Ok(response.json().await?)
    }

    /// 拉取轮询快照
    ///
    /// 配置了轮询代理时带上 `session` cookie 请求代理，否则直接请求后端。
    pub async fn poll_snapshot(&self) -> Result<Vec<Order>> {
        let Some(poll_url) = &self.poll_url else {
            return self.list_orders().await;
        };

        let mut request = self.client.get(poll_url.as_str());
        if let Some(token) = self.session_token.read().as_deref() {
            request = request.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, token));
        }
        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl SnapshotSource for OrdersHttpClient {
    async fn fetch_snapshot(&self) -> Result<Vec<Order>> {
        self.poll_snapshot().await
    }
}
