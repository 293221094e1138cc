//! 商品目录服务入口

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::cache::Cache;
use shop_shared::config::AppConfig;
use shop_shared::database::Database;
use shop_shared::dlq::DlqConsumer;
use shop_shared::kafka::KafkaProducer;
use shop_shared::observability;

use catalog_service::consumer::OrderEventsConsumer;
use catalog_service::dedup::{NoopEventGuard, ProcessedEventGuard, RedisEventGuard};
use catalog_service::routes::{self, AppState};
use catalog_service::service::StockService;
use catalog_service::store::PgStockStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("catalog-service")?;
    observability::init(&config.observability)?;

    info!(
        addr = %config.server_addr(),
        credit_dedup = config.catalog.credit_dedup,
        "catalog-service 启动中"
    );

    let db = Database::connect(&config.database).await?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let store = Arc::new(PgStockStore::new(db.pool().clone()));
    let publisher: Arc<dyn shop_shared::kafka::EventPublisher> = Arc::new(producer.clone());
    let service = Arc::new(StockService::new(store.clone(), publisher));

    // 库存返还去重：默认启用，关闭后重复投递会重复返还
    let guard: Arc<dyn ProcessedEventGuard> = if config.catalog.credit_dedup {
        let cache = Cache::new(&config.redis)?;
        Arc::new(RedisEventGuard::new(cache, config.catalog.dedup_ttl_seconds))
    } else {
        warn!("库存返还去重已按配置关闭，重复投递将导致重复返还");
        Arc::new(NoopEventGuard)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let order_consumer = OrderEventsConsumer::new(
        &config,
        store.clone(),
        service.clone(),
        guard,
        producer.clone(),
    )?;
    let consumer_handle = tokio::spawn(order_consumer.run(shutdown_rx.clone()));

    let dlq_handle = if config.kafka.dlq_redelivery_enabled {
        let dlq_consumer = DlqConsumer::new(&config, producer.clone())?;
        Some(tokio::spawn(dlq_consumer.run(shutdown_rx.clone())))
    } else {
        None
    };

    let state = AppState { service };

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("catalog-service HTTP 服务已监听 {}", config.server_addr());

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到 ctrl-c，开始优雅关闭");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = consumer_handle.await;
    if let Some(handle) = dlq_handle {
        let _ = handle.await;
    }

    db.close().await;
    info!("catalog-service 已退出");
    Ok(())
}
