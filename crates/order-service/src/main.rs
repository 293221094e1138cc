//! 订单服务入口
//!
//! 同时运行 HTTP API（订单创建、查询、状态流转）和两个 Kafka 消费者
//! （支付结果消费者、死信队列消费者），通过 watch channel 优雅关闭。

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::config::AppConfig;
use shop_shared::database::Database;
use shop_shared::dlq::DlqConsumer;
use shop_shared::kafka::KafkaProducer;
use shop_shared::observability;

use order_service::catalog_client::HttpCatalogClient;
use order_service::consumer::PaymentStatusConsumer;
use order_service::orchestrator::{OrderCreateHandler, StockMode};
use order_service::routes::{self, AppState};
use order_service::store::PgOrderStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("order-service")?;
    observability::init(&config.observability)?;

    info!(
        addr = %config.server_addr(),
        stock_mode = %config.order.stock_mode,
        enforce_status_gate = config.order.enforce_status_gate,
        "order-service 启动中"
    );

    let db = Database::connect(&config.database).await?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let store = PgOrderStore::new(db.pool().clone());
    let catalog = Arc::new(HttpCatalogClient::new(&config.catalog_client)?);
    let publisher: Arc<dyn shop_shared::kafka::EventPublisher> = Arc::new(producer.clone());

    let create_handler = Arc::new(OrderCreateHandler::new(
        db.pool().clone(),
        catalog,
        publisher.clone(),
        StockMode::from_config(&config.order.stock_mode),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 支付结果消费者
    let payment_consumer =
        PaymentStatusConsumer::new(&config, Arc::new(store.clone()), producer.clone())?;
    let payment_handle = tokio::spawn(payment_consumer.run(shutdown_rx.clone()));

    // DLQ 重投消费者（可按配置关闭）
    let dlq_handle = if config.kafka.dlq_redelivery_enabled {
        let dlq_consumer = DlqConsumer::new(&config, producer.clone())?;
        Some(tokio::spawn(dlq_consumer.run(shutdown_rx.clone())))
    } else {
        warn!("DLQ 重投已按配置禁用");
        None
    };

    let state = AppState {
        store,
        create_handler,
        publisher,
    };

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("order-service HTTP 服务已监听 {}", config.server_addr());

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到 ctrl-c，开始优雅关闭");
        })
        .await?;

    // HTTP 已停止，通知消费者退出并等待其完成在途消息
    let _ = shutdown_tx.send(true);
    let _ = payment_handle.await;
    if let Some(handle) = dlq_handle {
        let _ = handle.await;
    }

    db.close().await;
    info!("order-service 已退出");
    Ok(())
}
