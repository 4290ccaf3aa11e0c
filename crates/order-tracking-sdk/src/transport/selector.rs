//! 传输选择器
//!
//! 启动时根据托管环境信号决定传输优先级和初始降级时限。
//! Supervisor 只消费 [`TransportPlan`]，不关心具体探测规则。

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// 默认：需要先尝试实时通道时的降级时限
pub const DEFAULT_PRIMARY_DEADLINE: Duration = Duration::from_secs(5);
/// 默认：已确定走轮询时的降级时限
pub const DEFAULT_PREDETERMINED_DEADLINE: Duration = Duration::from_secs(1);

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// 持久双向流（Socket.IO over WebSocket）
    Primary,
    /// HTTP 定时轮询
    Fallback,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Primary => write!(f, "WebSocket"),
            TransportKind::Fallback => write!(f, "Polling"),
        }
    }
}

/// 托管平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostingPlatform {
    /// 自托管 / 常驻进程，可以保持长连接
    #[default]
    SelfHosted,
    Vercel,
    Netlify,
    AwsLambda,
}

impl HostingPlatform {
    /// serverless 平台无法保持持久 socket
    pub fn supports_persistent_socket(&self) -> bool {
        matches!(self, HostingPlatform::SelfHosted)
    }
}

/// 启动时采集一次的环境信号
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSignals {
    pub platform: HostingPlatform,
    /// 显式强制轮询（ORDER_TRACKING_FORCE_POLLING=1）
    pub force_polling: bool,
}

impl EnvironmentSignals {
    /// 从进程环境变量采集
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意 key → value 查找函数采集（便于测试）
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_set = |key: &str| {
            lookup(key)
                .map(|v| {
                    let v = v.trim();
                    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
                })
                .unwrap_or(false)
        };

        let platform = if is_set("VERCEL") {
            HostingPlatform::Vercel
        } else if is_set("NETLIFY") {
            HostingPlatform::Netlify
        } else if is_set("AWS_LAMBDA_FUNCTION_NAME") {
            HostingPlatform::AwsLambda
        } else {
            HostingPlatform::SelfHosted
        };

        Self {
            platform,
            force_polling: is_set("ORDER_TRACKING_FORCE_POLLING"),
        }
    }
}

/// 选择结果：传输优先级 + 初始降级时限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPlan {
    pub preferred: Vec<TransportKind>,
    pub fallback_deadline: Duration,
}

impl TransportPlan {
    pub fn includes_primary(&self) -> bool {
        self.preferred.contains(&TransportKind::Primary)
    }

    /// 已确定直接走轮询
    pub fn is_fallback_predetermined(&self) -> bool {
        self.preferred.first() == Some(&TransportKind::Fallback)
    }
}

/// 传输选择器
#[derive(Debug, Clone)]
pub struct TransportSelector {
    primary_deadline: Duration,
    predetermined_deadline: Duration,
}

impl Default for TransportSelector {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_DEADLINE, DEFAULT_PREDETERMINED_DEADLINE)
    }
}

impl TransportSelector {
    pub fn new(primary_deadline: Duration, predetermined_deadline: Duration) -> Self {
        Self {
            primary_deadline,
            predetermined_deadline,
        }
    }

    /// 纯函数：同样的信号总是得到同样的计划
    pub fn evaluate(&self, signals: &EnvironmentSignals) -> TransportPlan {
        let plan = if signals.force_polling || !signals.platform.supports_persistent_socket() {
            TransportPlan {
                preferred: vec![TransportKind::Fallback],
                fallback_deadline: self.predetermined_deadline,
            }
        } else {
            TransportPlan {
                preferred: vec![TransportKind::Primary, TransportKind::Fallback],
                fallback_deadline: self.primary_deadline,
            }
        };

        info!(
            "🧭 传输选择: platform={:?}, force_polling={}, preferred={:?}, deadline={}ms",
            signals.platform,
            signals.force_polling,
            plan.preferred,
            plan.fallback_deadline.as_millis()
        );
        plan
    }
}
