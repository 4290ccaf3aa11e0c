//! 连接状态管理
//!
//! 状态只由 ConnectionSupervisor 写入；视图层通过 watch 订阅，
//! 只能看到三样东西：连接状态、可选的状态说明、订单更新流。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::events::{EventManager, TrackingEvent};
use crate::transport::selector::TransportKind;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 未连接
    Disconnected,
    /// 连接中（首次连接或实时通道重连中）
    Connecting,
    /// 实时通道已连接
    ConnectedPrimary,
    /// 已降级为轮询（本会话内终态）
    ConnectedFallback,
    /// 出错（配置缺失 / 会话过期）
    Errored,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::ConnectedPrimary | ConnectionStatus::ConnectedFallback
        )
    }

    pub fn active_transport(&self) -> Option<TransportKind> {
        match self {
            ConnectionStatus::ConnectedPrimary => Some(TransportKind::Primary),
            ConnectionStatus::ConnectedFallback => Some(TransportKind::Fallback),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "未连接"),
            ConnectionStatus::Connecting => write!(f, "连接中"),
            ConnectionStatus::ConnectedPrimary => write!(f, "已连接（实时）"),
            ConnectionStatus::ConnectedFallback => write!(f, "已连接（轮询）"),
            ConnectionStatus::Errored => write!(f, "连接错误"),
        }
    }
}

/// 状态说明的分类，便于 UI 区分"会话过期"等需要用户处理的情况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusReason {
    #[default]
    None,
    /// 轮询收到 401
    SessionExpired,
    /// 缺少 URL 配置
    NotConfigured,
    /// 实时通道错误（仍在预算内重试）
    TransportError,
    /// 轮询拉取失败（下个周期重试）
    FetchWarning,
}

/// 连接状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reason: StatusReason,
    /// 可读的状态说明
    pub message: Option<String>,
    /// 当前实时通道已消耗的尝试次数
    pub primary_attempts: u32,
    /// 最后一次变化时间（UTC 毫秒时间戳）
    pub changed_at: i64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reason: StatusReason::None,
            message: None,
            primary_attempts: 0,
            changed_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.status == ConnectionStatus::Errored && self.reason == StatusReason::SessionExpired
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{} ({})", self.status, message),
            None => self.status.to_string(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// 连接状态管理器
///
/// 每次状态变化同时写入 watch 通道并广播 `ConnectionStateChanged` 事件。
#[derive(Debug, Clone)]
pub struct ConnectionStateManager {
    sender: Arc<watch::Sender<ConnectionState>>,
    events: Arc<EventManager>,
}

impl ConnectionStateManager {
    pub fn new(events: Arc<EventManager>) -> Self {
        let (sender, _) = watch::channel(ConnectionState::new());
        Self {
            sender: Arc::new(sender),
            events,
        }
    }

    /// 更新状态（附带说明）
    pub fn transition(&self, status: ConnectionStatus, reason: StatusReason, message: Option<String>) {
        let mut old_status = status;
        let changed = self.sender.send_if_modified(|state| {
            if state.status == status && state.reason == reason && state.message == message {
                return false;
            }
            old_status = state.status;
            state.status = status;
            state.reason = reason;
            state.message = message.clone();
            state.changed_at = Utc::now().timestamp_millis();
            true
        });

        if changed {
            tracing::info!("🔌 连接状态: {} → {}", old_status, self.sender.borrow().summary());
            self.events.emit(TrackingEvent::ConnectionStateChanged {
                old_status,
                new_status: status,
                reason,
                message,
                timestamp: Utc::now().timestamp_millis(),
            });
        }
    }

    /// 更新状态（清空说明）
    pub fn set_status(&self, status: ConnectionStatus) {
        self.transition(status, StatusReason::None, None);
    }

    /// 只更新说明，不改变状态（如轮询告警）
    pub fn set_notice(&self, reason: StatusReason, message: impl Into<String>) {
        let status = self.sender.borrow().status;
        self.transition(status, reason, Some(message.into()));
    }

    pub fn set_primary_attempts(&self, attempts: u32) {
        self.sender.send_if_modified(|state| {
            if state.primary_attempts == attempts {
                return false;
            }
            state.primary_attempts = attempts;
            true
        });
    }

    /// 获取当前状态快照
    pub fn get_state(&self) -> ConnectionState {
        self.sender.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.sender.borrow().status
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_published() {
        let events = Arc::new(EventManager::new(16));
        let mut event_rx = events.subscribe();
        let manager = ConnectionStateManager::new(events);
        let mut rx = manager.subscribe();

        manager.set_status(ConnectionStatus::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, ConnectionStatus::Connecting);

        manager.transition(
            ConnectionStatus::Errored,
            StatusReason::SessionExpired,
            Some("会话已过期".to_string()),
        );
        assert!(manager.get_state().is_session_expired());

        match event_rx.recv().await.unwrap() {
            TrackingEvent::ConnectionStateChanged { old_status, new_status, .. } => {
                assert_eq!(old_status, ConnectionStatus::Disconnected);
                assert_eq!(new_status, ConnectionStatus::Connecting);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identical_transition_is_ignored() {
        let events = Arc::new(EventManager::new(16));
        let manager = ConnectionStateManager::new(events.clone());

        manager.set_status(ConnectionStatus::ConnectedFallback);
        manager.set_status(ConnectionStatus::ConnectedFallback);
        assert_eq!(events.get_stats().total_events, 1);
        assert_eq!(
            manager.status().active_transport(),
            Some(TransportKind::Fallback)
        );
    }
}
