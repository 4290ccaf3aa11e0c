//! 合并引擎
//!
//! 纯函数：(当前集合, 一条订单更新) → 新集合。
//! 同 ID 原位替换（保持位置），否则追加到末尾。不做 I/O，也不关心更新来自哪个传输。

use crate::models::Order;

/// 本地订单集合（按 ID 唯一，保持首次出现顺序）
pub type OrderCollection = Vec<Order>;

/// 单次合并的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 新订单，追加到末尾
    Inserted,
    /// 已有订单，原位替换
    Replaced { index: usize },
    /// 与现有内容完全一致，未改动
    Unchanged { index: usize },
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ReconcileOutcome::Unchanged { .. })
    }
}

/// 返回合并后的新集合，不修改输入
pub fn reconcile(collection: &[Order], incoming: Order) -> OrderCollection {
    let mut next = collection.to_vec();
    reconcile_in_place(&mut next, incoming);
    next
}

/// 原地合并
pub fn reconcile_in_place(collection: &mut OrderCollection, incoming: Order) -> ReconcileOutcome {
    match collection.iter().position(|order| order.id == incoming.id) {
        Some(index) if collection[index] == incoming => ReconcileOutcome::Unchanged { index },
        Some(index) => {
            collection[index] = incoming;
            ReconcileOutcome::Replaced { index }
        }
        None => {
            collection.push(incoming);
            ReconcileOutcome::Inserted
        }
    }
}

/// 依次合并一批订单（快照或批量推送），返回发生变化的条数
pub fn reconcile_all<I>(collection: &mut OrderCollection, incoming: I) -> usize
where
    I: IntoIterator<Item = Order>,
{
    incoming
        .into_iter()
        .map(|order| reconcile_in_place(collection, order))
        .filter(ReconcileOutcome::changed)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;

    fn order(id: &str, status: OrderStatus) -> Order {
        Order::new(id, status)
    }

    #[test]
    fn test_sequence_keeps_first_appearance_order() {
        let updates = vec![
            order("a", OrderStatus::Pending),
            order("b", OrderStatus::Pending),
            order("a", OrderStatus::Delivered),
            order("c", OrderStatus::InTransit),
        ];

        let mut collection = OrderCollection::new();
        for update in updates {
            collection = reconcile(&collection, update);
        }

        let ids: Vec<&str> = collection.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(collection[0].status, OrderStatus::Delivered);
    }

    #[test]
    fn test_snapshot_then_stream_update_replaces() {
        let snapshot: Vec<Order> =
            serde_json::from_str(r#"[{"id":"1","status":"pending"}]"#).unwrap();
        let update: Order = serde_json::from_str(r#"{"id":"1","status":"in_transit"}"#).unwrap();

        let collection = reconcile(&snapshot, update);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection[0].id, "1");
        assert_eq!(collection[0].status, OrderStatus::InTransit);
    }

    #[test]
    fn test_reconcile_is_pure() {
        let original = vec![order("x", OrderStatus::Pending)];
        let next = reconcile(&original, order("x", OrderStatus::Cancelled));
        assert_eq!(original[0].status, OrderStatus::Pending);
        assert_eq!(next[0].status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_in_place_outcomes() {
        let mut collection = OrderCollection::new();
        assert_eq!(
            reconcile_in_place(&mut collection, order("1", OrderStatus::Pending)),
            ReconcileOutcome::Inserted
        );
        assert_eq!(
            reconcile_in_place(&mut collection, order("2", OrderStatus::Pending)),
            ReconcileOutcome::Inserted
        );
        assert_eq!(
            reconcile_in_place(
                &mut collection,
                order("2", OrderStatus::Pending).with_location(1.0, 2.0)
            ),
            ReconcileOutcome::Replaced { index: 1 }
        );
        let same = collection[1].clone();
        assert_eq!(
            reconcile_in_place(&mut collection, same),
            ReconcileOutcome::Unchanged { index: 1 }
        );
    }

    #[test]
    fn test_reconcile_all_counts_changes() {
        let mut collection = vec![order("1", OrderStatus::Pending)];
        let changed = reconcile_all(
            &mut collection,
            vec![
                order("1", OrderStatus::Pending),
                order("2", OrderStatus::Pending),
                order("1", OrderStatus::InTransit),
            ],
        );
        assert_eq!(changed, 2);
        assert_eq!(collection.len(), 2);
    }
}
