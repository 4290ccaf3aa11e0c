//! 订单实时追踪演示
//!
//! 连接 BACK_URL 指向的后端，打印连接状态变化和订单集合。
//!
//! ```bash
//! BACK_URL=http://localhost:3001 cargo run --example live_orders_demo
//! # 模拟 serverless 环境，直接走轮询
//! VERCEL=1 BACK_URL=http://localhost:3001 cargo run --example live_orders_demo
//! ```

use order_tracking_sdk::{
    ConnectionSupervisor, OrderStore, OrdersHttpClient, TrackingConfig, TrackingEvent,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 订单实时追踪演示\n");
    println!("====================================\n");

    let config = TrackingConfig::from_env();
    println!("后端: {}", config.backend_url_or_default());
    println!("环境: {:?}\n", config.environment);

    // 先加载当前订单，再叠加实时更新
    let store = Arc::new(OrderStore::new());
    let client = OrdersHttpClient::from_config(&config)?;
    match client.list_orders().await {
        Ok(orders) => {
            println!("📋 已加载 {} 条订单\n", orders.len());
            store.replace_all(orders);
        }
        Err(e) => println!("⚠️ 加载订单失败，等待实时更新: {}\n", e),
    }

    let supervisor = ConnectionSupervisor::from_config(config)?;

    // 订单事件
    let mut events = supervisor.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let TrackingEvent::OrderUpdated { order, source, .. } = event {
                println!("📦 [{}] {} → {}", source, order.short_id(), order.status);
            }
        }
    });

    let target = store.clone();
    supervisor.start(Arc::new(move |order| {
        target.apply(order);
    }));

    // 连接状态
    let mut state = supervisor.subscribe_state();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            println!("🔌 {}", state.borrow().summary());
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
    }

    supervisor.stop();
    watcher.abort();

    println!("\n【订单集合】共 {} 条", store.len());
    for (status, count) in store.count_by_status() {
        println!("   {}: {}", status, count);
    }
    println!("   可在地图上标注: {}", store.mappable().len());
    Ok(())
}
