//! 轮询代理（`GET /api/orders/poll`）的服务端逻辑
//!
//! 浏览器端轮询不直接访问后端：请求先到应用自己的代理，
//! 代理确认带有会话 cookie 后再向后端拉取 `/orders`。

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::http_client::{OrdersHttpClient, SESSION_COOKIE};

/// 代理响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResponse {
    pub status: u16,
    pub body: Value,
}

impl ProxyResponse {
    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

/// 从 Cookie 请求头中取出会话 token
pub fn session_from_cookie_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}

pub struct PollProxy {
    backend: Arc<OrdersHttpClient>,
}

impl PollProxy {
    pub fn new(backend: Arc<OrdersHttpClient>) -> Self {
        Self { backend }
    }

    /// 处理一次轮询请求；`cookie_header` 为原始 Cookie 请求头
    pub async fn handle(&self, cookie_header: Option<&str>) -> ProxyResponse {
        if cookie_header.and_then(session_from_cookie_header).is_none() {
            debug!("轮询请求未携带会话，返回 401");
            return ProxyResponse::error(401, "No autenticado");
        }

        match self.backend.list_orders().await {
            Ok(orders) => match serde_json::to_value(&orders) {
                Ok(body) => ProxyResponse { status: 200, body },
                Err(e) => ProxyResponse::error(500, e.to_string()),
            },
            Err(e) => {
                error!("❌ 轮询代理拉取订单失败: {}", e);
                ProxyResponse::error(500, e.to_string())
            }
        }
    }
}
