//! 事件系统模块
//!
//! 功能包括：
//! - 连接状态变更事件
//! - 订单更新事件（带来源传输）
//! - 轮询告警事件
//! - 事件广播和订阅机制

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::connection_state::{ConnectionStatus, StatusReason};
use crate::models::Order;
use crate::transport::selector::TransportKind;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackingEvent {
    /// 连接状态变更
    ConnectionStateChanged {
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
        reason: StatusReason,
        message: Option<String>,
        timestamp: i64,
    },
    /// 订单更新已交付给使用方
    OrderUpdated {
        order: Order,
        source: TransportKind,
        timestamp: i64,
    },
    /// 轮询拉取到的快照与上次不同
    SnapshotChanged {
        order_count: usize,
        fingerprint: String,
        timestamp: i64,
    },
    /// 轮询拉取失败（非致命）
    PollFailed {
        error: String,
        timestamp: i64,
    },
}

impl TrackingEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            TrackingEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            TrackingEvent::OrderUpdated { .. } => "order_updated",
            TrackingEvent::SnapshotChanged { .. } => "snapshot_changed",
            TrackingEvent::PollFailed { .. } => "poll_failed",
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> i64 {
        match self {
            TrackingEvent::ConnectionStateChanged { timestamp, .. } => *timestamp,
            TrackingEvent::OrderUpdated { timestamp, .. } => *timestamp,
            TrackingEvent::SnapshotChanged { timestamp, .. } => *timestamp,
            TrackingEvent::PollFailed { timestamp, .. } => *timestamp,
        }
    }

    /// 获取事件关联的订单 ID
    pub fn order_id(&self) -> Option<&str> {
        match self {
            TrackingEvent::OrderUpdated { order, .. } => Some(order.id.as_str()),
            _ => None,
        }
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&TrackingEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<TrackingEvent>,
    /// 事件监听器映射（"*" 为通用监听器）
    listeners: Arc<RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: TrackingEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的客户端），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器（`"*"` 监听所有事件）
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();
        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn order_event(id: &str) -> TrackingEvent {
        TrackingEvent::OrderUpdated {
            order: Order::new(id, OrderStatus::Pending),
            source: TransportKind::Primary,
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_event_broadcast() {
        let manager = EventManager::new(8);
        let mut rx = manager.subscribe();

        manager.emit(order_event("42"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "order_updated");
        assert_eq!(event.order_id(), Some("42"));
    }

    #[test]
    fn test_listeners_and_stats() {
        let manager = EventManager::new(8);
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let typed_clone = typed.clone();
        manager.add_listener("poll_failed", move |_| {
            typed_clone.fetch_add(1, Ordering::SeqCst);
        });
        let all_clone = all.clone();
        manager.add_listener("*", move |_| {
            all_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager.emit(order_event("1"));
        manager.emit(TrackingEvent::PollFailed {
            error: "502".to_string(),
            timestamp: 2,
        });

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);

        let stats = manager.get_stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.listener_count, 2);
        assert_eq!(stats.last_event_time, Some(2));

        manager.clear_listeners();
        assert_eq!(manager.get_stats().listener_count, 0);
    }
}
