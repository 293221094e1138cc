//! 订单事件消费者
//!
//! - OrderCreated：只读审计，逐行记录商品剩余库存，可安全重放
//! - OrderCancelled：将每行数量返还库存。返还前用事件 ID 做一次性声明，
//!   重复投递时跳过；`catalog.credit_dedup = false` 时不做声明，
//!   重复投递会导致重复返还（保留原有缺陷以便对照）。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use shop_shared::config::AppConfig;
use shop_shared::dlq::DlqProducer;
use shop_shared::error::Result;
use shop_shared::events::{OrderCancelled, OrderCreated};
use shop_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use shop_shared::retry::{RetryPolicy, retry_with_policy};

use crate::dedup::ProcessedEventGuard;
use crate::model::{StockAction, StockUpdateItem};
use crate::service::StockService;
use crate::store::StockStore;

/// 去重声明使用的消费者标识
const CREDIT_CONSUMER: &str = "catalog-service.stock-credit";

// ---------------------------------------------------------------------------
// 事件处理逻辑
// ---------------------------------------------------------------------------

/// 处理订单创建事件：逐行审计剩余库存，不做任何写入
pub async fn handle_order_created(store: &dyn StockStore, event: &OrderCreated) -> Result<()> {
    for item in &event.items {
        let remaining = store
            .get(item.product_id)
            .await?
            .map(|s| s.quantity)
            .unwrap_or(0);

        info!(
            order_id = %event.order_id,
            product_id = %item.product_id,
            quantity = item.quantity,
            remaining,
            "订单创建审计：商品剩余库存"
        );
    }
    Ok(())
}

/// 处理订单取消事件：返还每行数量
///
/// 先声明事件 ID：声明失败表示该事件已返还过，直接跳过。
/// 返还失败时归还声明再传播错误，该事件的重新投递才能补上返还。
pub async fn handle_order_cancelled(
    service: &StockService,
    guard: &dyn ProcessedEventGuard,
    event: &OrderCancelled,
) -> Result<()> {
    if !guard.try_claim(CREDIT_CONSUMER, event.meta.event_id).await? {
        info!(
            order_id = %event.order_id,
            event_id = %event.meta.event_id,
            "订单取消事件已处理过，跳过库存返还"
        );
        return Ok(());
    }

    let credits: Vec<StockUpdateItem> = event
        .items
        .iter()
        .map(|item| StockUpdateItem {
            product_id: item.product_id,
            quantity: item.quantity,
            action: StockAction::Add,
        })
        .collect();

    if let Err(e) = service.apply(&credits).await {
        if let Err(release_err) = guard.release(CREDIT_CONSUMER, event.meta.event_id).await {
            error!(
                order_id = %event.order_id,
                event_id = %event.meta.event_id,
                error = %release_err,
                "库存返还失败后归还声明失败，该事件的重投将被跳过"
            );
        }
        return Err(e);
    }

    info!(
        order_id = %event.order_id,
        reason = %event.cancellation_reason,
        lines = credits.len(),
        "订单取消，库存已返还"
    );
    Ok(())
}

/// 按 topic 分发单条消息
pub async fn process_order_message(
    msg: &ConsumerMessage,
    store: &dyn StockStore,
    service: &StockService,
    guard: &dyn ProcessedEventGuard,
) -> Result<()> {
    match msg.topic.as_str() {
        topics::ORDER_CREATED => {
            let event: OrderCreated = msg.deserialize_payload()?;
            handle_order_created(store, &event).await
        }
        topics::ORDER_CANCELLED => {
            let event: OrderCancelled = msg.deserialize_payload()?;
            handle_order_cancelled(service, guard, &event).await
        }
        other => {
            warn!(topic = other, "收到未订阅的 topic 消息，忽略");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// OrderEventsConsumer
// ---------------------------------------------------------------------------

/// 订单事件消费者，重试耗尽后写入死信队列
pub struct OrderEventsConsumer {
    consumer: KafkaConsumer,
    store: Arc<dyn StockStore>,
    service: Arc<StockService>,
    guard: Arc<dyn ProcessedEventGuard>,
    dlq: Arc<DlqProducer>,
    retry_policy: RetryPolicy,
}

impl OrderEventsConsumer {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StockStore>,
        service: Arc<StockService>,
        guard: Arc<dyn ProcessedEventGuard>,
        producer: KafkaProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("orders"))?;
        consumer.subscribe(&[topics::ORDER_CREATED, topics::ORDER_CANCELLED])?;

        Ok(Self {
            consumer,
            store,
            service,
            guard,
            dlq: Arc::new(DlqProducer::new(producer, "catalog-service", config)),
            retry_policy: RetryPolicy::from_kafka(&config.kafka),
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let store = self.store.clone();
        let service = self.service.clone();
        let guard = self.guard.clone();
        let dlq = self.dlq.clone();
        let retry_policy = self.retry_policy.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let store = store.clone();
                let service = service.clone();
                let guard = guard.clone();
                let dlq = dlq.clone();
                let retry_policy = retry_policy.clone();

                async move {
                    let result = retry_with_policy(
                        &retry_policy,
                        "处理订单事件",
                        |e| e.is_retryable(),
                        || {
                            process_order_message(
                                &msg,
                                store.as_ref(),
                                service.as_ref(),
                                guard.as_ref(),
                            )
                        },
                    )
                    .await;

                    if let Err(e) = result {
                        dlq.send_to_dlq(&msg, &e.to_string()).await?;
                    }

                    Ok(())
                }
            })
            .await;

        info!("订单事件消费循环已退出");
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
