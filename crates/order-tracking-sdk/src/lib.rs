//! Order Tracking SDK - 订单实时追踪
//!
//! 把本地订单集合与后端保持同步：
//! - 📡 实时通道：Socket.IO over WebSocket，有限次数指数退避重连
//! - 🔁 自动降级：实时通道不可用时切换为 HTTP 轮询，快照指纹去重
//! - 🧩 合并引擎：按订单 ID 原位替换，新订单追加
//! - ⚙️ 事件系统：连接状态 watch 通道 + 事件广播
//! - 🔐 会话：JWT 载荷解码、路由访问控制、轮询代理
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use order_tracking_sdk::{ConnectionSupervisor, OrderStore, OrdersHttpClient, TrackingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // BACK_URL / SOCKET_URL / ORDER_POLL_URL
//!     let config = TrackingConfig::from_env();
//!
//!     // 先加载当前订单
//!     let store = Arc::new(OrderStore::new());
//!     let client = OrdersHttpClient::from_config(&config)?;
//!     store.replace_all(client.list_orders().await?);
//!
//!     let supervisor = ConnectionSupervisor::from_config(config)?;
//!     let target = store.clone();
//!     supervisor.start(Arc::new(move |order| {
//!         target.apply(order);
//!     }));
//!
//!     let mut state = supervisor.subscribe_state();
//!     while state.changed().await.is_ok() {
//!         println!("连接状态: {}", state.borrow().summary());
//!     }
//!
//!     supervisor.stop();
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod connection_state;
pub mod error;
pub mod events;
pub mod http_client;
pub mod models;
pub mod poll_proxy;
pub mod rate_limiter;
pub mod route_guard;
pub mod schema;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod transport;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpClientConfig, TrackingConfig, TrackingConfigBuilder};
pub use connection_state::{ConnectionState, ConnectionStateManager, ConnectionStatus, StatusReason};
pub use error::{OrderTrackingError, Result};
pub use events::{EventManager, EventStats, TrackingEvent};
pub use http_client::{LoginResponse, LoginUser, OrdersHttpClient};
pub use models::{GeoPoint, LocationUpdate, Order, OrderDraft, OrderPatch, OrderStatus, OrderType};
pub use poll_proxy::{PollProxy, ProxyResponse};
pub use rate_limiter::{ReconnectBackoff, ReconnectBackoffStats, ReconnectConfig};
pub use route_guard::{Role, RouteDecision};
pub use session::{SessionClaims, SessionContext, SessionStore};
pub use store::OrderStore;
pub use supervisor::ConnectionSupervisor;
pub use sync::{
    reconcile, Fingerprint, OrderCollection, PollOutcome, PollingDriver, ReconcileOutcome,
    SnapshotSource, UpdateSink,
};
pub use transport::{
    EnvironmentSignals, HostingPlatform, StreamConnection, StreamTransport, TransportKind,
    TransportPlan, TransportSelector, WebSocketTransport,
};
