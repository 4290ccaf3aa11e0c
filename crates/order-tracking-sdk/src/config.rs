//! SDK 配置
//!
//! 配置在进程启动时解析一次（`TrackingConfig::from_env()` 或 builder），
//! 之后以 `Arc<TrackingConfig>` 的形式共享给各组件。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrderTrackingError, Result};
use crate::rate_limiter::ReconnectConfig;
use crate::transport::selector::{
    EnvironmentSignals, TransportPlan, TransportSelector, DEFAULT_PREDETERMINED_DEADLINE,
    DEFAULT_PRIMARY_DEADLINE,
};

/// 未配置 BACK_URL 时后端的默认地址
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(5),
            // 轮询间隔为 5s，单次请求不应拖过一个周期太久
            request_timeout_secs: Some(10),
        }
    }
}

/// Order Tracking SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// 后端 REST API 基础 URL（BACK_URL）
    pub backend_url: Option<String>,
    /// 实时通道 URL（SOCKET_URL），为空时复用 backend_url
    pub socket_url: Option<String>,
    /// 轮询代理 URL（ORDER_POLL_URL），为空时直接轮询 `{backend_url}/orders`
    pub poll_url: Option<String>,
    /// 会话 token（作为 `session` cookie 发给轮询代理）
    pub session_token: Option<String>,
    /// 单次实时通道握手超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 需要先尝试实时通道时的降级时限（毫秒）
    pub primary_deadline_ms: u64,
    /// 已确定走轮询时的降级时限（毫秒）
    pub predetermined_deadline_ms: u64,
    /// 重连配置
    pub reconnect: ReconnectConfig,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 启动时采集的环境信号
    pub environment: EnvironmentSignals,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            socket_url: None,
            poll_url: None,
            session_token: None,
            connect_timeout_ms: 5_000,
            poll_interval_ms: 5_000,
            primary_deadline_ms: DEFAULT_PRIMARY_DEADLINE.as_millis() as u64,
            predetermined_deadline_ms: DEFAULT_PREDETERMINED_DEADLINE.as_millis() as u64,
            reconnect: ReconnectConfig::default(),
            http_client_config: HttpClientConfig::default(),
            event_buffer_size: 256,
            environment: EnvironmentSignals::default(),
        }
    }
}

impl TrackingConfig {
    pub fn builder() -> TrackingConfigBuilder {
        TrackingConfigBuilder::new()
    }

    /// 从进程环境变量解析
    ///
    /// - `BACK_URL`：后端地址
    /// - `SOCKET_URL`：实时通道地址
    /// - `ORDER_POLL_URL`：轮询代理地址
    /// - `ORDER_POLL_INTERVAL_MS`：轮询间隔
    /// - 以及 [`EnvironmentSignals::from_env`] 读取的托管平台信号
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self {
            backend_url: non_empty("BACK_URL"),
            socket_url: non_empty("SOCKET_URL"),
            poll_url: non_empty("ORDER_POLL_URL"),
            environment: EnvironmentSignals::from_lookup(&lookup),
            ..Self::default()
        };
        if let Some(ms) = non_empty("ORDER_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.poll_interval_ms = ms;
        }
        config
    }

    /// 后端地址，未配置时使用本地默认值
    pub fn backend_url_or_default(&self) -> String {
        self.backend_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
    }

    /// 实时通道地址
    pub fn resolved_socket_url(&self) -> Option<&str> {
        self.socket_url.as_deref().or(self.backend_url.as_deref())
    }

    /// 快照（轮询）地址：优先轮询代理，其次后端 `/orders`
    pub fn snapshot_url(&self) -> Option<String> {
        if let Some(poll) = &self.poll_url {
            return Some(poll.clone());
        }
        self.backend_url
            .as_ref()
            .map(|base| format!("{}/orders", base.trim_end_matches('/')))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn selector(&self) -> TransportSelector {
        TransportSelector::new(
            Duration::from_millis(self.primary_deadline_ms),
            Duration::from_millis(self.predetermined_deadline_ms),
        )
    }

    /// 校验配置是否足以执行给定的传输计划
    pub fn validate_for(&self, plan: &TransportPlan) -> Result<()> {
        if self.snapshot_url().is_none() {
            return Err(OrderTrackingError::Config(
                "未配置 BACK_URL / ORDER_POLL_URL，无法获取订单快照".to_string(),
            ));
        }
        if plan.includes_primary() && self.resolved_socket_url().is_none() {
            return Err(OrderTrackingError::Config(
                "未配置 SOCKET_URL / BACK_URL，无法建立实时连接".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(OrderTrackingError::Config("轮询间隔不能为 0".to_string()));
        }
        Ok(())
    }
}

/// 配置构建器
pub struct TrackingConfigBuilder {
    config: TrackingConfig,
}

impl TrackingConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TrackingConfig::default(),
        }
    }

    pub fn backend_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend_url = Some(url.into());
        self
    }

    pub fn socket_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.socket_url = Some(url.into());
        self
    }

    pub fn poll_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.poll_url = Some(url.into());
        self
    }

    pub fn session_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.session_token = Some(token.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// 设置降级时限（实时通道优先 / 已确定轮询）
    pub fn deadlines(mut self, primary: Duration, predetermined: Duration) -> Self {
        self.config.primary_deadline_ms = primary.as_millis() as u64;
        self.config.predetermined_deadline_ms = predetermined.as_millis() as u64;
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn environment(mut self, signals: EnvironmentSignals) -> Self {
        self.config.environment = signals;
        self
    }

    pub fn build(self) -> TrackingConfig {
        self.config
    }
}

impl Default for TrackingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
