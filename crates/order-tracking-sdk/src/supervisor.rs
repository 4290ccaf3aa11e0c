//! 连接监督器
//!
//! 负责一次追踪会话的完整生命周期：
//!
//! 1. 根据 [`TransportPlan`] 决定先连实时通道还是直接轮询
//! 2. 实时通道由独立的 worker 任务按退避预算重连
//! 3. 降级时限内没连上、或预算耗尽，切换到轮询（本会话内不再回切）
//! 4. 轮询收到 401 时进入 `Errored(SessionExpired)`，停止一切拉取
//!
//! 任务结构：
//!
//! ```text
//! session task ──┬── primary worker（child token）
//!                └── polling task（child token）
//! ```
//!
//! 状态只由会话任务写入，使用方通过 `subscribe_state()` 观察。

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TrackingConfig;
use crate::connection_state::{
    ConnectionState, ConnectionStateManager, ConnectionStatus, StatusReason,
};
use crate::error::{OrderTrackingError, Result};
use crate::events::{EventManager, TrackingEvent};
use crate::http_client::OrdersHttpClient;
use crate::models::{LocationUpdate, Order};
use crate::rate_limiter::ReconnectBackoff;
use crate::sync::polling::{PollOutcome, PollingDriver, SnapshotSource, TickOutcome, UpdateSink};
use crate::transport::selector::{TransportKind, TransportPlan};
use crate::transport::stream::{StreamTransport, WebSocketTransport};

/// 坐标上报队列长度
const OUTBOUND_CAPACITY: usize = 32;

/// primary worker → 会话任务
#[derive(Debug)]
enum PrimaryEvent {
    Connected,
    Update(Order),
    /// 连接尝试失败
    Failed(String),
    /// 已建立的连接断开
    Disconnected(Option<String>),
    /// 当前环境无法建立实时通道，无需重试
    Unavailable(String),
    /// 预算耗尽
    GaveUp,
}

/// 订单交付闸门
///
/// `stop()` 关闭闸门后不会再有任何回调；关闭操作会等待正在执行的回调结束。
/// 可重入：回调内部调用 `stop()` 不会死锁。
struct DeliveryGate {
    open: ReentrantMutex<Cell<bool>>,
    sink: UpdateSink,
    events: Arc<EventManager>,
}

impl DeliveryGate {
    fn new(sink: UpdateSink, events: Arc<EventManager>) -> Self {
        Self {
            open: ReentrantMutex::new(Cell::new(true)),
            sink,
            events,
        }
    }

    fn deliver(&self, order: Order, source: TransportKind) -> bool {
        let open = self.open.lock();
        if !open.get() {
            return false;
        }
        (self.sink)(order.clone());
        self.events.emit(TrackingEvent::OrderUpdated {
            order,
            source,
            timestamp: Utc::now().timestamp_millis(),
        });
        true
    }

    fn close(&self) {
        self.open.lock().set(false);
    }
}

/// 各任务共享的组件
struct Shared {
    config: Arc<TrackingConfig>,
    transport: Arc<dyn StreamTransport>,
    poller: Arc<PollingDriver>,
    events: Arc<EventManager>,
    state: ConnectionStateManager,
    backoff: Arc<ReconnectBackoff>,
    outbound: Mutex<Option<mpsc::Sender<LocationUpdate>>>,
}

struct ActiveSession {
    cancel: CancellationToken,
    gate: Arc<DeliveryGate>,
    task: JoinHandle<()>,
}

/// 连接监督器
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    session: Mutex<Option<ActiveSession>>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: TrackingConfig,
        transport: Arc<dyn StreamTransport>,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let state = ConnectionStateManager::new(events.clone());
        let poller = Arc::new(
            PollingDriver::new(source, config.poll_interval()).with_events(events.clone()),
        );
        let backoff = Arc::new(ReconnectBackoff::new(config.reconnect.clone()));

        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                transport,
                poller,
                events,
                state,
                backoff,
                outbound: Mutex::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    /// 使用默认实现：WebSocket 实时通道 + HTTP 轮询
    pub fn from_config(config: TrackingConfig) -> Result<Self> {
        let transport = WebSocketTransport::new(
            config.resolved_socket_url().unwrap_or_default(),
            config.connect_timeout(),
        );
        let source = OrdersHttpClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(transport), Arc::new(source)))
    }

    /// 开始追踪
    ///
    /// 会话运行中重复调用不做任何事；会话结束后（如会话过期）可以再次调用。
    /// 配置缺失时直接进入 `Errored(NotConfigured)`，不会 panic。
    pub fn start(&self, on_update: UpdateSink) {
        let mut session = self.session.lock();
        if let Some(active) = session.as_ref() {
            if !active.task.is_finished() {
                debug!("追踪会话已在运行，忽略重复 start");
                return;
            }
        }

        let shared = &self.shared;
        let plan = shared.config.selector().evaluate(&shared.config.environment);
        if let Err(e) = shared.config.validate_for(&plan) {
            error!("❌ 无法开始追踪: {}", e);
            shared
                .state
                .transition(ConnectionStatus::Errored, StatusReason::NotConfigured, Some(e.to_string()));
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("❌ start() 需要在 tokio 运行时中调用: {}", e);
                shared.state.transition(
                    ConnectionStatus::Errored,
                    StatusReason::NotConfigured,
                    Some("需要 tokio 运行时".to_string()),
                );
                return;
            }
        };

        shared.backoff.reset();
        shared.poller.reset_fingerprint();
        shared.state.set_status(ConnectionStatus::Connecting);

        let cancel = CancellationToken::new();
        let gate = Arc::new(DeliveryGate::new(on_update, shared.events.clone()));
        let task = runtime.spawn(run_session(
            shared.clone(),
            plan,
            cancel.clone(),
            gate.clone(),
        ));

        info!("🚀 追踪会话已启动");
        *session = Some(ActiveSession { cancel, gate, task });
    }

    /// 停止追踪（同步）
    ///
    /// 返回后不会再有任何 `on_update` 回调，也不会再发起任何连接或拉取。
    pub fn stop(&self) {
        let active = self.session.lock().take();
        if let Some(active) = active {
            active.gate.close();
            active.cancel.cancel();
            active.task.abort();
            info!("🛑 追踪会话已停止");
        }
        *self.shared.outbound.lock() = None;
        self.shared.state.set_status(ConnectionStatus::Disconnected);
    }

    /// 会话是否仍在运行
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|active| !active.task.is_finished())
            .unwrap_or(false)
    }

    /// 通过实时通道上报订单坐标，仅在实时通道已连接时可用
    pub fn update_order_location(&self, id: &str, lat: f64, lng: f64) -> Result<()> {
        if self.shared.state.status() != ConnectionStatus::ConnectedPrimary {
            return Err(OrderTrackingError::NotConnected);
        }
        let sender = self
            .shared
            .outbound
            .lock()
            .clone()
            .ok_or(OrderTrackingError::NotConnected)?;

        sender
            .try_send(LocationUpdate {
                id: id.to_string(),
                lat,
                lng,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    OrderTrackingError::Other("坐标上报队列已满".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => OrderTrackingError::NotConnected,
            })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get_state()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<TrackingEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> Arc<EventManager> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if self.session.lock().is_some() {
            self.stop();
        }
    }
}

/// 会话任务
async fn run_session(
    shared: Arc<Shared>,
    plan: TransportPlan,
    cancel: CancellationToken,
    gate: Arc<DeliveryGate>,
) {
    let primary_token = cancel.child_token();
    let mut primary_rx = None;
    let mut deadline: Option<Pin<Box<Sleep>>> = None;
    let mut polling: Option<JoinHandle<PollOutcome>> = None;

    if plan.is_fallback_predetermined() {
        info!("📡 当前环境不支持实时通道，直接使用轮询");
        polling = Some(activate_fallback(&shared, &cancel, &gate));
    } else {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        *shared.outbound.lock() = Some(outbound_tx);
        tokio::spawn(primary_worker(
            shared.clone(),
            primary_token.clone(),
            event_tx,
            outbound_rx,
        ));
        primary_rx = Some(event_rx);
        deadline = Some(Box::pin(tokio::time::sleep(plan.fallback_deadline)));
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                primary_token.cancel();
                return;
            }
            event = recv_primary(&mut primary_rx) => {
                let fallback_active = polling.is_some();
                match event {
                    None => {
                        primary_rx = None;
                    }
                    Some(PrimaryEvent::Connected) if fallback_active => {
                        info!("实时通道在降级后才连上，断开以保持单一数据源");
                        primary_token.cancel();
                    }
                    Some(PrimaryEvent::Connected) => {
                        deadline = None;
                        shared.state.set_status(ConnectionStatus::ConnectedPrimary);
                    }
                    Some(PrimaryEvent::Update(order)) => {
                        if fallback_active {
                            debug!("已降级为轮询，丢弃实时通道更新: {}", order.short_id());
                        } else if !cancel.is_cancelled() {
                            gate.deliver(order, TransportKind::Primary);
                        }
                    }
                    Some(PrimaryEvent::Failed(_)) | Some(PrimaryEvent::Disconnected(_)) if fallback_active => {
                        primary_token.cancel();
                    }
                    Some(PrimaryEvent::Failed(message)) => {
                        shared.state.transition(
                            ConnectionStatus::Connecting,
                            StatusReason::TransportError,
                            Some(message),
                        );
                    }
                    Some(PrimaryEvent::Disconnected(message)) => {
                        let reason = if message.is_some() {
                            StatusReason::TransportError
                        } else {
                            StatusReason::None
                        };
                        shared.state.transition(ConnectionStatus::Connecting, reason, message);
                    }
                    Some(PrimaryEvent::Unavailable(message)) => {
                        primary_token.cancel();
                        if !fallback_active {
                            info!("📡 实时通道不可用（{}），直接使用轮询", message);
                            deadline = None;
                            polling = Some(activate_fallback(&shared, &cancel, &gate));
                        }
                    }
                    Some(PrimaryEvent::GaveUp) => {
                        if !fallback_active {
                            warn!("⚠️ 实时通道重连预算耗尽，降级为轮询");
                            deadline = None;
                            polling = Some(activate_fallback(&shared, &cancel, &gate));
                        }
                    }
                }
            }
            _ = wait_deadline(&mut deadline) => {
                deadline = None;
                if polling.is_none() {
                    info!(
                        "⏱️ 实时通道 {}ms 内未连上，降级为轮询",
                        plan.fallback_deadline.as_millis()
                    );
                    polling = Some(activate_fallback(&shared, &cancel, &gate));
                }
            }
            outcome = join_polling(&mut polling) => {
                primary_token.cancel();
                if outcome == PollOutcome::SessionExpired && !cancel.is_cancelled() {
                    *shared.outbound.lock() = None;
                    shared.state.transition(
                        ConnectionStatus::Errored,
                        StatusReason::SessionExpired,
                        Some("会话已过期，请重新登录".to_string()),
                    );
                }
                return;
            }
        }
    }
}

/// 切换到轮询：状态置为 ConnectedFallback 并启动轮询任务
fn activate_fallback(
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
    gate: &Arc<DeliveryGate>,
) -> JoinHandle<PollOutcome> {
    *shared.outbound.lock() = None;
    shared.state.set_status(ConnectionStatus::ConnectedFallback);

    let token = cancel.child_token();
    let sink_gate = gate.clone();
    let sink: UpdateSink = Arc::new(move |order| {
        sink_gate.deliver(order, TransportKind::Fallback);
    });

    let state = shared.state.clone();
    let observer_token = token.clone();
    let observer = move |outcome: &TickOutcome| {
        if observer_token.is_cancelled() {
            return;
        }
        match outcome {
            TickOutcome::Failed(e) => {
                state.set_notice(StatusReason::FetchWarning, format!("订单刷新失败: {}", e));
            }
            TickOutcome::Reconciled(_) | TickOutcome::Unchanged => {
                if state.get_state().reason == StatusReason::FetchWarning {
                    state.set_status(ConnectionStatus::ConnectedFallback);
                }
            }
            TickOutcome::SessionExpired | TickOutcome::Discarded => {}
        }
    };

    let poller = shared.poller.clone();
    tokio::spawn(async move { poller.run(token, sink, observer).await })
}

/// 实时通道 worker：在退避预算内反复连接，把事件转给会话任务
async fn primary_worker(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    events: mpsc::Sender<PrimaryEvent>,
    mut outbound: mpsc::Receiver<LocationUpdate>,
) {
    loop {
        let Some(delay) = shared.backoff.next_attempt() else {
            let _ = events.send(PrimaryEvent::GaveUp).await;
            return;
        };
        shared.state.set_primary_attempts(shared.backoff.attempts());

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.transport.connect() => result,
        };
        let mut connection = match connected {
            Ok(connection) => connection,
            Err(e) if !e.is_retryable() => {
                debug!("实时通道不可用，不再重试: {}", e);
                let _ = events.send(PrimaryEvent::Unavailable(e.to_string())).await;
                return;
            }
            Err(e) => {
                warn!(
                    "⚠️ 实时通道连接失败 ({}/{}): {}",
                    shared.backoff.attempts(),
                    shared.backoff.max_attempts(),
                    e
                );
                if events.send(PrimaryEvent::Failed(e.to_string())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        shared.backoff.mark_connected();
        if events.send(PrimaryEvent::Connected).await.is_err() {
            connection.close().await;
            return;
        }

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    connection.close().await;
                    return;
                }
                Some(update) = outbound.recv() => {
                    if let Err(e) = connection.send_location(&update).await {
                        break Some(e.to_string());
                    }
                }
                result = connection.next_update() => match result {
                    Ok(Some(order)) => {
                        if events.send(PrimaryEvent::Update(order)).await.is_err() {
                            connection.close().await;
                            return;
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(e.to_string()),
                }
            }
        };

        match &reason {
            Some(e) => warn!("⚠️ 实时通道断开: {}", e),
            None => info!("实时通道断开"),
        }
        connection.close().await;
        if events.send(PrimaryEvent::Disconnected(reason)).await.is_err() {
            return;
        }
    }
}

async fn recv_primary(rx: &mut Option<mpsc::Receiver<PrimaryEvent>>) -> Option<PrimaryEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn join_polling(handle: &mut Option<JoinHandle<PollOutcome>>) -> PollOutcome {
    match handle {
        Some(handle) => handle.await.unwrap_or(PollOutcome::Cancelled),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::rate_limiter::ReconnectConfig;
    use crate::store::OrderStore;
    use crate::sync::polling::test_helpers::{recording_sink, ScriptedSource};
    use crate::transport::selector::{EnvironmentSignals, HostingPlatform};
    use crate::transport::stream::StreamConnection;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Step {
        Fail,
        Unavailable,
        Connect(mpsc::UnboundedReceiver<Order>),
    }

    /// 按脚本连接的内存传输，脚本用完后一律失败
    struct MockTransport {
        delay: Duration,
        steps: Mutex<VecDeque<Step>>,
        connects: AtomicUsize,
        closed: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<LocationUpdate>>>,
    }

    impl MockTransport {
        fn new(delay: Duration, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                steps: Mutex::new(steps.into()),
                connects: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct MockConnection {
        feed: mpsc::UnboundedReceiver<Order>,
        closed: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<LocationUpdate>>>,
    }

    #[async_trait]
    impl StreamConnection for MockConnection {
        async fn next_update(&mut self) -> Result<Option<Order>> {
            Ok(self.feed.recv().await)
        }

        async fn send_location(&mut self, update: &LocationUpdate) -> Result<()> {
            self.sent.lock().push(update.clone());
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StreamTransport for MockTransport {
        async fn connect(&self) -> Result<Box<dyn StreamConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let step = self.steps.lock().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Fail => Err(OrderTrackingError::Transport("connection refused".to_string())),
                Step::Unavailable => Err(OrderTrackingError::TransportUnavailable(
                    "WebSocket 升级被拒绝 (404 Not Found)".to_string(),
                )),
                Step::Connect(feed) => Ok(Box::new(MockConnection {
                    feed,
                    closed: self.closed.clone(),
                    sent: self.sent.clone(),
                })),
            }
        }
    }

    fn config(platform: HostingPlatform) -> TrackingConfig {
        TrackingConfig::builder()
            .backend_url("http://localhost:3001")
            .reconnect(ReconnectConfig::default().without_jitter())
            .environment(EnvironmentSignals {
                platform,
                force_polling: false,
            })
            .build()
    }

    fn snapshot() -> Vec<Order> {
        vec![
            Order::new("1", OrderStatus::Pending).with_location(10.0, 20.0),
            Order::new("2", OrderStatus::InTransit),
        ]
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_activates_fallback() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::SelfHosted), transport.clone(), source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink);
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(supervisor.state().status, ConnectionStatus::Connecting);
        assert_eq!(supervisor.state().reason, StatusReason::TransportError);
        assert_eq!(source.calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);
        assert_eq!(source.calls(), 1);
        assert_eq!(received.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predetermined_fallback_skips_primary() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::Vercel), transport.clone(), source.clone());
        let (sink, _) = recording_sink();

        supervisor.start(sink);
        settle().await;

        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);
        assert_eq!(transport.connects(), 0);
        assert_eq!(source.calls(), 1);
        assert!(matches!(
            supervisor.update_order_location("1", 1.0, 2.0),
            Err(OrderTrackingError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_connect_after_fallback_is_torn_down() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(Duration::from_secs(7), vec![Step::Connect(feed_rx)]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::SelfHosted), transport.clone(), source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.closed(), 1);
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);

        let _ = feed_tx.send(Order::new("99", OrderStatus::Delivered));
        settle().await;
        assert!(received.lock().iter().all(|order| order.id != "99"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_updates_reach_store() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(Duration::ZERO, vec![Step::Connect(feed_rx)]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::SelfHosted), transport.clone(), source.clone());

        let store = Arc::new(OrderStore::with_orders(snapshot()));
        let target = store.clone();
        supervisor.start(Arc::new(move |order| {
            target.apply(order);
        }));
        settle().await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedPrimary);

        feed_tx.send(Order::new("1", OrderStatus::Delivered)).unwrap();
        feed_tx.send(Order::new("3", OrderStatus::Pending)).unwrap();
        settle().await;

        let orders = store.snapshot();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].status, OrderStatus::Delivered);
        assert_eq!(orders[2].id, "3");

        supervisor.update_order_location("3", 4.5, -7.25).unwrap();
        settle().await;
        assert_eq!(transport.sent.lock()[0].lng, -7.25);

        // 已连上后降级时限失效
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedPrimary);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_retries_then_settles_to_fallback() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(Duration::ZERO, vec![Step::Connect(feed_rx)]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let mut config = config(HostingPlatform::SelfHosted);
        config.reconnect.max_attempts = 3;
        let supervisor = ConnectionSupervisor::new(config, transport.clone(), source.clone());
        let (sink, _) = recording_sink();

        supervisor.start(sink);
        settle().await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedPrimary);

        drop(feed_tx);
        settle().await;
        assert_eq!(supervisor.state().status, ConnectionStatus::Connecting);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);
        assert_eq!(transport.connects(), 3);
        assert!(source.calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_retry_delivers_nothing() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::SelfHosted), transport.clone(), source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        supervisor.stop();
        let connects = transport.connects();
        assert_eq!(supervisor.state().status, ConnectionStatus::Disconnected);
        assert!(!supervisor.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(received.lock().is_empty());
        assert_eq!(source.calls(), 0);
        assert_eq!(transport.connects(), connects);
        assert_eq!(supervisor.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expired_halts_until_restart() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot()),
            Err(OrderTrackingError::Unauthorized("No autenticado".to_string())),
            Ok(snapshot()),
        ]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::Vercel), transport, source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(6)).await;
        let state = supervisor.state();
        assert!(state.is_session_expired());
        assert_eq!(source.calls(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(received.lock().len(), 2);

        supervisor.start(sink);
        settle().await;
        assert_eq!(supervisor.state().status, ConnectionStatus::ConnectedFallback);
        assert_eq!(source.calls(), 3);
        assert_eq!(received.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::Netlify), transport, source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink.clone());
        supervisor.start(sink);
        settle().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(received.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_urls_is_errored() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![]));
        let supervisor = ConnectionSupervisor::new(TrackingConfig::default(), transport.clone(), source.clone());
        let (sink, _) = recording_sink();

        supervisor.start(sink);
        settle().await;

        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::Errored);
        assert_eq!(state.reason, StatusReason::NotConfigured);
        assert!(state.message.is_some());
        assert_eq!(transport.connects(), 0);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_sets_warning_then_clears() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(ScriptedSource::new(vec![
            Err(OrderTrackingError::Http {
                status: 500,
                message: "Error al obtener órdenes".to_string(),
            }),
            Ok(snapshot()),
        ]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::AwsLambda), transport, source.clone());
        let (sink, _) = recording_sink();

        supervisor.start(sink);
        settle().await;
        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::ConnectedFallback);
        assert_eq!(state.reason, StatusReason::FetchWarning);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::ConnectedFallback);
        assert_eq!(state.reason, StatusReason::None);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_primary_falls_back_silently() {
        let transport = MockTransport::new(Duration::ZERO, vec![Step::Unavailable]);
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot())]));
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::SelfHosted), transport.clone(), source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink);
        settle().await;

        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::ConnectedFallback);
        assert_eq!(state.reason, StatusReason::None);
        assert!(state.message.is_none());
        assert_eq!(source.calls(), 1);
        assert_eq!(received.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_discards_snapshot() {
        let transport = MockTransport::new(Duration::ZERO, vec![]);
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(snapshot())]).with_delay(Duration::from_secs(2)),
        );
        let supervisor =
            ConnectionSupervisor::new(config(HostingPlatform::Vercel), transport, source.clone());
        let (sink, received) = recording_sink();

        supervisor.start(sink);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);

        supervisor.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(received.lock().is_empty());
        assert_eq!(source.calls(), 1);
        assert_eq!(supervisor.state().status, ConnectionStatus::Disconnected);
    }
}
