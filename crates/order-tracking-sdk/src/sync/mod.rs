//! 订单同步模块
//!
//! - `reconcile`：把单条订单更新合并进本地集合
//! - `fingerprint`：快照指纹，用于轮询去重
//! - `polling`：实时通道不可用时的轮询驱动

pub mod fingerprint;
pub mod polling;
pub mod reconcile;

pub use fingerprint::Fingerprint;
pub use polling::{
    PollOutcome, PollingDriver, SnapshotSource, TickOutcome, UpdateSink, DEFAULT_POLL_INTERVAL,
};
pub use reconcile::{reconcile, reconcile_all, reconcile_in_place, OrderCollection, ReconcileOutcome};
