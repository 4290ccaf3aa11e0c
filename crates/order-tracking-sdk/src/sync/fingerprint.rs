//! 快照指纹
//!
//! 对每条订单的 `id|status|lat|lng` 做稳定序列化，按 ID 排序后取 SHA-256。
//! 描述和时间戳不参与，只关心地图上可见的变化。

use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::Order;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(orders: &[Order]) -> Self {
        let mut lines: Vec<String> = orders.iter().map(canonical_line).collect();
        lines.sort();

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 日志里只打前 12 位
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

fn canonical_line(order: &Order) -> String {
    let (lat, lng) = match order.location() {
        Some(point) => (point.lat.to_string(), point.lng.to_string()),
        None => ("-".to_string(), "-".to_string()),
    };
    format!("{}|{}|{}|{}", order.id, order.status.as_str(), lat, lng)
}
