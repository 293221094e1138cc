//! 支付服务入口
//!
//! 运行 HTTP API（支付处理、退款、查询）和死信队列消费者。

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::config::AppConfig;
use shop_shared::database::Database;
use shop_shared::dlq::DlqConsumer;
use shop_shared::kafka::{EventPublisher, KafkaProducer};
use shop_shared::observability;

use payment_service::processor::PaymentProcessor;
use payment_service::routes::{self, AppState};
use payment_service::store::{PaymentStore, PgPaymentStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("payment-service")?;
    observability::init(&config.observability)?;

    info!(
        addr = %config.server_addr(),
        provider = %config.payment.provider,
        currency = %config.payment.currency,
        "payment-service 启动中"
    );

    let db = Database::connect(&config.database).await?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(db.pool().clone()));
    let publisher: Arc<dyn EventPublisher> = Arc::new(producer.clone());

    let processor = Arc::new(PaymentProcessor::new(
        store.clone(),
        publisher,
        config.payment.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dlq_handle = if config.kafka.dlq_redelivery_enabled {
        let dlq_consumer = DlqConsumer::new(&config, producer.clone())?;
        Some(tokio::spawn(dlq_consumer.run(shutdown_rx.clone())))
    } else {
        warn!("DLQ 重投已按配置禁用");
        None
    };

    let state = AppState { processor, store };

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("payment-service HTTP 服务已监听 {}", config.server_addr());

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到 ctrl-c，开始优雅关闭");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = dlq_handle {
        let _ = handle.await;
    }

    db.close().await;
    info!("payment-service 已退出");
    Ok(())
}
