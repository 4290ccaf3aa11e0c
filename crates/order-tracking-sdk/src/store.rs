//! 视图层持有的本地订单集合
//!
//! 只通过合并引擎写入：初始快照用 `replace_all`，之后每条更新走 `apply`。
//! 视图卸载时调用 `clear()` 丢弃。

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::models::{GeoPoint, Order, OrderStatus};
use crate::sync::reconcile::{reconcile_all, reconcile_in_place, OrderCollection, ReconcileOutcome};

#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<OrderCollection>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以初始快照创建（快照内重复 ID 按合并规则去重）
    pub fn with_orders(orders: Vec<Order>) -> Self {
        let store = Self::new();
        store.replace_all(orders);
        store
    }

    /// 用新快照整体替换
    pub fn replace_all(&self, orders: Vec<Order>) {
        let mut collection = OrderCollection::with_capacity(orders.len());
        reconcile_all(&mut collection, orders);
        debug!("📦 本地订单集合已初始化: {} 条", collection.len());
        *self.orders.write() = collection;
    }

    /// 合并一条订单更新
    pub fn apply(&self, order: Order) -> ReconcileOutcome {
        reconcile_in_place(&mut self.orders.write(), order)
    }

    pub fn clear(&self) {
        self.orders.write().clear();
    }

    pub fn snapshot(&self) -> OrderCollection {
        self.orders.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Order> {
        self.orders.read().iter().find(|order| order.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// 可以在地图上标注的订单
    pub fn mappable(&self) -> Vec<(Order, GeoPoint)> {
        self.orders
            .read()
            .iter()
            .filter_map(|order| order.mappable_location().map(|point| (order.clone(), point)))
            .collect()
    }

    /// 各状态的订单数
    pub fn count_by_status(&self) -> HashMap<OrderStatus, usize> {
        let mut counts = HashMap::new();
        for order in self.orders.read().iter() {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        counts
    }
}
