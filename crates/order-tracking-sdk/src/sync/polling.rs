//! 轮询驱动
//!
//! 实时通道不可用时，按固定间隔拉取订单全量快照，
//! 快照指纹变化时才把每条订单交给更新回调。
//!
//! - 拉取失败（网络 / 非 2xx）：告警，保留上次指纹，下个周期重试
//! - 401：返回 `SessionExpired`，停止轮询直到重新 start
//! - 取消后完成的请求直接丢弃

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use crate::error::{OrderTrackingError, Result};
use crate::events::{EventManager, TrackingEvent};
use crate::models::Order;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 订单更新回调（视图层持有的唯一写入口）
pub type UpdateSink = Arc<dyn Fn(Order) + Send + Sync>;

/// 订单快照来源
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// 拉取当前全部订单
    async fn fetch_snapshot(&self) -> Result<Vec<Order>>;
}

/// 单个轮询周期的结果
#[derive(Debug)]
pub enum TickOutcome {
    /// 快照有变化，已交付 n 条订单
    Reconciled(usize),
    /// 指纹相同，未交付
    Unchanged,
    /// 拉取失败，下个周期重试
    Failed(OrderTrackingError),
    /// 会话失效
    SessionExpired,
    /// 已取消，结果被丢弃
    Discarded,
}

/// 轮询循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Cancelled,
    SessionExpired,
}

/// 轮询驱动
pub struct PollingDriver {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    last_fingerprint: Mutex<Option<Fingerprint>>,
    events: Option<Arc<EventManager>>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<PollOutcome>)>>,
}

impl PollingDriver {
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            last_fingerprint: Mutex::new(None),
            events: None,
            worker: Mutex::new(None),
        }
    }

    /// 附加事件总线（SnapshotChanged / PollFailed）
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.last_fingerprint.lock().clone()
    }

    /// 清空指纹，下一次拉取必定交付
    pub fn reset_fingerprint(&self) {
        *self.last_fingerprint.lock() = None;
    }

    /// 执行一个轮询周期
    pub async fn poll_once(&self, cancel: &CancellationToken, sink: &UpdateSink) -> TickOutcome {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TickOutcome::Discarded,
            result = self.source.fetch_snapshot() => result,
        };

        if cancel.is_cancelled() {
            debug!("轮询已取消，丢弃迟到的快照");
            return TickOutcome::Discarded;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_auth_error() => {
                warn!("🔒 轮询返回 401，会话已过期，停止轮询");
                return TickOutcome::SessionExpired;
            }
            Err(e) => {
                warn!("⚠️ 轮询拉取失败，下个周期重试: {}", e);
                self.emit(TrackingEvent::PollFailed {
                    error: e.to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                });
                return TickOutcome::Failed(e);
            }
        };

        let fingerprint = Fingerprint::of(&snapshot);
        {
            let mut last = self.last_fingerprint.lock();
            if last.as_ref() == Some(&fingerprint) {
                debug!("快照未变化 ({})，跳过合并", fingerprint);
                return TickOutcome::Unchanged;
            }
            *last = Some(fingerprint.clone());
        }

        let count = snapshot.len();
        for order in snapshot {
            sink(order);
        }

        debug!("📦 快照变化 ({})，已交付 {} 条订单", fingerprint, count);
        self.emit(TrackingEvent::SnapshotChanged {
            order_count: count,
            fingerprint: fingerprint.as_str().to_string(),
            timestamp: Utc::now().timestamp_millis(),
        });
        TickOutcome::Reconciled(count)
    }

    /// 轮询循环：首个周期立即执行，之后按间隔执行，直到取消或会话失效
    pub async fn run<F>(&self, cancel: CancellationToken, sink: UpdateSink, observer: F) -> PollOutcome
    where
        F: Fn(&TickOutcome) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("🔁 轮询已启动，间隔 {}ms", self.interval.as_millis());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("轮询已停止");
                    return PollOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let outcome = self.poll_once(&cancel, &sink).await;
            observer(&outcome);
            match outcome {
                TickOutcome::SessionExpired => return PollOutcome::SessionExpired,
                TickOutcome::Discarded => return PollOutcome::Cancelled,
                TickOutcome::Reconciled(_) | TickOutcome::Unchanged | TickOutcome::Failed(_) => {}
            }
        }
    }

    /// 在后台启动轮询；已在运行时不做任何事，返回 false
    pub fn start(self: &Arc<Self>, sink: UpdateSink) -> bool {
        let mut worker = self.worker.lock();
        if let Some((_, handle)) = worker.as_ref() {
            if !handle.is_finished() {
                debug!("轮询已在运行，忽略重复 start");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let driver = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { driver.run(token, sink, |_| {}).await });
        *worker = Some((cancel, handle));
        true
    }

    /// 停止后台轮询（同步），之后不会再有任何周期执行
    pub fn stop(&self) {
        if let Some((cancel, handle)) = self.worker.lock().take() {
            cancel.cancel();
            handle.abort();
        }
    }

    /// 后台轮询是否仍在运行
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    fn emit(&self, event: TrackingEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Drop for PollingDriver {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use crate::models::OrderStatus;

    fn snapshot(status: OrderStatus) -> Vec<Order> {
        vec![Order::new("1", status), Order::new("2", OrderStatus::Pending)]
    }

    #[tokio::test]
    async fn test_same_snapshot_reconciled_once() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot(OrderStatus::Pending)),
            Ok(snapshot(OrderStatus::Pending)),
        ]));
        let driver = PollingDriver::new(source, DEFAULT_POLL_INTERVAL);
        let (sink, received) = recording_sink();
        let cancel = CancellationToken::new();

        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Reconciled(2)));
        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Unchanged));
        assert_eq!(received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_fingerprint() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot(OrderStatus::Pending)),
            Err(OrderTrackingError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            }),
            Ok(snapshot(OrderStatus::Pending)),
            Ok(snapshot(OrderStatus::InTransit)),
        ]));
        let events = Arc::new(EventManager::new(16));
        let driver = PollingDriver::new(source, DEFAULT_POLL_INTERVAL).with_events(events.clone());
        let (sink, received) = recording_sink();
        let cancel = CancellationToken::new();

        driver.poll_once(&cancel, &sink).await;
        let fingerprint = driver.last_fingerprint();
        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Failed(_)));
        assert_eq!(driver.last_fingerprint(), fingerprint);
        // 失败后同样的快照不会再次交付
        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Unchanged));
        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Reconciled(2)));

        let received = received.lock();
        assert_eq!(received.len(), 4);
        assert_eq!(received[2].status, OrderStatus::InTransit);
        assert_eq!(events.get_stats().events_by_type.get("poll_failed"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expired_halts_loop() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot(OrderStatus::Pending)),
            Err(OrderTrackingError::Unauthorized("No autenticado".to_string())),
        ]));
        let driver = PollingDriver::new(source.clone(), Duration::from_secs(5));
        let (sink, _) = recording_sink();

        let outcome = driver.run(CancellationToken::new(), sink, |_| {}).await;
        assert_eq!(outcome, PollOutcome::SessionExpired);
        assert_eq!(source.calls(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot(OrderStatus::Pending))]));
        let driver = Arc::new(PollingDriver::new(source.clone(), Duration::from_secs(5)));
        let (sink, _) = recording_sink();

        assert!(driver.start(sink.clone()));
        assert!(!driver.start(sink));
        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(source.calls(), 2);

        driver.stop();
        assert!(!driver.is_running());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_discarded() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot(OrderStatus::Pending))]));
        let driver = PollingDriver::new(source, DEFAULT_POLL_INTERVAL);
        let (sink, received) = recording_sink();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(driver.poll_once(&cancel, &sink).await, TickOutcome::Discarded));
        assert!(received.lock().is_empty());
        assert!(driver.last_fingerprint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_fetch_discarded_after_cancel() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(snapshot(OrderStatus::Pending))])
                .with_delay(Duration::from_secs(2)),
        );
        let driver = Arc::new(PollingDriver::new(source.clone(), Duration::from_secs(5)));
        let (sink, received) = recording_sink();
        let cancel = CancellationToken::new();

        let runner = driver.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(token, sink, |_| {}).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), PollOutcome::Cancelled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 1);
        assert!(received.lock().is_empty());
        assert!(driver.last_fingerprint().is_none());
    }
}
