//! 重连退避演示
//!
//! 打印默认配置下每次重连前的等待时间，以及预算耗尽后的降级点。

use order_tracking_sdk::{ReconnectBackoff, ReconnectConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("\n🔁 重连退避演示\n");

    let backoff = ReconnectBackoff::new(ReconnectConfig::default().without_jitter());
    let mut total_ms = 0u128;
    while let Some(delay) = backoff.next_attempt() {
        total_ms += delay.as_millis();
        println!(
            "尝试 #{:>2}: 等待 {:>5}ms（累计 {:>6}ms）",
            backoff.attempts(),
            delay.as_millis(),
            total_ms
        );
    }
    println!("\n⚠️ {} 次尝试后预算耗尽，降级为轮询", backoff.max_attempts());
}
