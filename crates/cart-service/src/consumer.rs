//! 订单创建消费者
//!
//! 下单成功后清空该客户的购物车。购物车不存在时记录日志跳过，
//! 因此事件重复投递天然幂等。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::config::AppConfig;
use shop_shared::dlq::DlqProducer;
use shop_shared::error::Result;
use shop_shared::events::OrderCreated;
use shop_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use shop_shared::retry::{RetryPolicy, retry_with_policy};

use crate::store::CartStore;

/// 处理订单创建事件：删除该客户的购物车聚合
pub async fn handle_order_created(store: &dyn CartStore, event: &OrderCreated) -> Result<()> {
    let Some(cart) = store.find_by_client(event.client_id).await? else {
        info!(
            order_id = %event.order_id,
            client_id = %event.client_id,
            "客户没有活跃购物车，跳过清空"
        );
        return Ok(());
    };

    store.delete_cart(cart.id).await?;

    info!(
        order_id = %event.order_id,
        cart_id = %cart.id,
        client_id = %event.client_id,
        "下单成功，购物车已清空"
    );
    Ok(())
}

/// 订单创建消费者
pub struct OrderCreatedConsumer {
    consumer: KafkaConsumer,
    store: Arc<dyn CartStore>,
    dlq: Arc<DlqProducer>,
    retry_policy: RetryPolicy,
}

impl OrderCreatedConsumer {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn CartStore>,
        producer: KafkaProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("orders"))?;
        consumer.subscribe(&[topics::ORDER_CREATED])?;

        Ok(Self {
            consumer,
            store,
            dlq: Arc::new(DlqProducer::new(producer, "cart-service", config)),
            retry_policy: RetryPolicy::from_kafka(&config.kafka),
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let store = self.store.clone();
        let dlq = self.dlq.clone();
        let retry_policy = self.retry_policy.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let store = store.clone();
                let dlq = dlq.clone();
                let retry_policy = retry_policy.clone();

                async move {
                    let result = retry_with_policy(
                        &retry_policy,
                        "清空购物车",
                        |e| e.is_retryable(),
                        || async {
                            let event: OrderCreated = msg.deserialize_payload()?;
                            handle_order_created(store.as_ref(), &event).await
                        },
                    )
                    .await;

                    if let Err(e) = result {
                        warn!(error = %e, "清空购物车失败，消息进入死信队列");
                        dlq.send_to_dlq(&msg, &e.to_string()).await?;
                    }

                    Ok(())
                }
            })
            .await;

        info!("订单创建消费循环已退出");
    }
}
