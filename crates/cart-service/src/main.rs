//! 购物车服务入口
//!
//! 纯后台工作进程：订单创建消费者 + 放弃购物车扫描器 + DLQ 重投消费者。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::config::AppConfig;
use shop_shared::database::Database;
use shop_shared::dlq::DlqConsumer;
use shop_shared::kafka::KafkaProducer;
use shop_shared::observability;

use cart_service::abandonment::CartAbandonmentScheduler;
use cart_service::consumer::OrderCreatedConsumer;
use cart_service::store::PgCartStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("cart-service")?;
    observability::init(&config.observability)?;

    info!(
        abandonment_enabled = config.cart.abandonment_enabled,
        threshold_hours = config.cart.abandonment_threshold_hours,
        "cart-service 启动中"
    );

    let db = Database::connect(&config.database).await?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let store = Arc::new(PgCartStore::new(db.pool().clone()));
    let publisher: Arc<dyn shop_shared::kafka::EventPublisher> = Arc::new(producer.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let order_consumer = OrderCreatedConsumer::new(&config, store.clone(), producer.clone())?;
    handles.push(tokio::spawn(order_consumer.run(shutdown_rx.clone())));

    if config.cart.abandonment_enabled {
        let scheduler = CartAbandonmentScheduler::new(store.clone(), publisher, &config.cart);
        handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    } else {
        warn!("放弃购物车扫描已按配置禁用");
    }

    if config.kafka.dlq_redelivery_enabled {
        let dlq_consumer = DlqConsumer::new(&config, producer.clone())?;
        handles.push(tokio::spawn(dlq_consumer.run(shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c().await?;
    info!("收到 ctrl-c，开始优雅关闭");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    db.close().await;
    info!("cart-service 已退出");
    Ok(())
}
