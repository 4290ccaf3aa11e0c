use reqwest::StatusCode;
use tokio_tungstenite::tungstenite;

/// SDK 错误类型
///
/// 所有错误最终都会在 Supervisor / PollingDriver 内部被转换为状态值，
/// 不会抛给使用方视图。
#[derive(Debug, thiserror::Error)]
pub enum OrderTrackingError {
    /// 传输层错误（意外断开、握手失败等），可重试
    #[error("Transport error: {0}")]
    Transport(String),
    /// 实时通道在当前环境下不可用（如 serverless 托管），静默降级
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    /// HTTP 非 2xx 响应
    #[error("HTTP error [{status}]: {message}")]
    Http { status: u16, message: String },
    /// 会话失效（401）
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Socket.IO / Engine.IO 协议帧错误
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl OrderTrackingError {
    /// 根据 HTTP 状态码构造错误，401 单独归类为会话失效
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == StatusCode::UNAUTHORIZED {
            OrderTrackingError::Unauthorized(message)
        } else {
            OrderTrackingError::Http {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// 是否为认证错误（会话过期）
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            OrderTrackingError::Unauthorized(_) | OrderTrackingError::Http { status: 401, .. }
        )
    }

    /// 是否值得在下一个周期重试
    pub fn is_retryable(&self) -> bool {
        match self {
            OrderTrackingError::Transport(_) => true,
            OrderTrackingError::Timeout(_) => true,
            OrderTrackingError::Serialization(_) => true,
            OrderTrackingError::Protocol(_) => true,
            OrderTrackingError::Http { status, .. } => *status != 401,
            OrderTrackingError::Other(_) => true,
            OrderTrackingError::TransportUnavailable(_)
            | OrderTrackingError::Unauthorized(_)
            | OrderTrackingError::Config(_)
            | OrderTrackingError::NotConnected
            | OrderTrackingError::InvalidInput(_) => false,
        }
    }
}

impl From<serde_json::Error> for OrderTrackingError {
    fn from(error: serde_json::Error) -> Self {
        OrderTrackingError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for OrderTrackingError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return OrderTrackingError::Timeout(error.to_string());
        }
        if let Some(status) = error.status() {
            return OrderTrackingError::from_status(status, error.to_string());
        }
        if error.is_decode() {
            return OrderTrackingError::Serialization(error.to_string());
        }
        OrderTrackingError::Transport(error.to_string())
    }
}

impl From<tungstenite::Error> for OrderTrackingError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            // 服务端拒绝升级（4xx）：该部署没有实时通道
            tungstenite::Error::Http(response) if response.status().is_client_error() => {
                OrderTrackingError::TransportUnavailable(format!(
                    "WebSocket 升级被拒绝 ({})",
                    response.status()
                ))
            }
            other => OrderTrackingError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrderTrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = OrderTrackingError::from_status(StatusCode::UNAUTHORIZED, "no session");
        assert!(err.is_auth_error());
        assert!(!err.is_retryable());

        let err = OrderTrackingError::from_status(StatusCode::BAD_GATEWAY, "upstream");
        assert!(!err.is_auth_error());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "HTTP error [502]: upstream");
    }

    #[test]
    fn test_non_retryable_variants() {
        assert!(!OrderTrackingError::Config("BACK_URL".into()).is_retryable());
        assert!(!OrderTrackingError::NotConnected.is_retryable());
        assert!(OrderTrackingError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn test_rejected_upgrade_is_unavailable() {
        let response = tungstenite::http::Response::builder()
            .status(404)
            .body(None)
            .unwrap();
        let err = OrderTrackingError::from(tungstenite::Error::Http(response));
        assert!(matches!(err, OrderTrackingError::TransportUnavailable(_)));
        assert!(!err.is_retryable());

        let err = OrderTrackingError::from(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, OrderTrackingError::Transport(_)));
        assert!(err.is_retryable());
    }
}
