//! 支付结果消费者
//!
//! 消费 shop.payment.completed / shop.payment.failed，将支付结果写回订单。
//! 默认行为是无条件覆盖订单状态（保留原有语义，不经过状态机校验），
//! `order.enforce_status_gate = true` 时改为先查当前状态、
//! 经流转表校验后再写入，非法流转进入重试与死信路径。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use shop_shared::config::AppConfig;
use shop_shared::dlq::DlqProducer;
use shop_shared::error::{Result, ShopError};
use shop_shared::events::{PaymentCompleted, PaymentFailed};
use shop_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use shop_shared::retry::{RetryPolicy, retry_with_policy};

use crate::state_machine::{OrderStatus, can_transition};
use crate::store::OrderStatusStore;

// ---------------------------------------------------------------------------
// 事件处理逻辑
// ---------------------------------------------------------------------------

/// 处理支付成功事件
///
/// - 订单不存在：记录警告后跳过（事件可能先于订单到达或订单属于其他分片）
/// - enforce_gate 为 false：无条件写入 Paid，即使当前状态是 Cancelled 等终态
/// - enforce_gate 为 true：流转表拒绝时返回 InvalidStateTransition
pub async fn apply_payment_completed(
    store: &dyn OrderStatusStore,
    event: &PaymentCompleted,
    enforce_gate: bool,
) -> Result<()> {
    let Some(current) = store.current_status(event.order_id).await? else {
        warn!(order_id = %event.order_id, "支付成功事件对应的订单不存在，跳过");
        return Ok(());
    };

    if enforce_gate && !can_transition(current, OrderStatus::Paid) {
        return Err(ShopError::InvalidStateTransition {
            current: current.to_string(),
            requested: OrderStatus::Paid.to_string(),
        });
    }

    store
        .mark_paid(
            event.order_id,
            event.transaction_id.as_deref(),
            None,
            event.paid_at,
        )
        .await?;

    info!(
        order_id = %event.order_id,
        payment_id = %event.payment_id,
        previous_status = %current,
        "订单已标记为 Paid"
    );
    Ok(())
}

/// 处理支付失败事件，语义与 [`apply_payment_completed`] 对称
pub async fn apply_payment_failed(
    store: &dyn OrderStatusStore,
    event: &PaymentFailed,
    enforce_gate: bool,
) -> Result<()> {
    let Some(current) = store.current_status(event.order_id).await? else {
        warn!(order_id = %event.order_id, "支付失败事件对应的订单不存在，跳过");
        return Ok(());
    };

    if enforce_gate && !can_transition(current, OrderStatus::PaymentFailed) {
        return Err(ShopError::InvalidStateTransition {
            current: current.to_string(),
            requested: OrderStatus::PaymentFailed.to_string(),
        });
    }

    store
        .mark_payment_failed(event.order_id, event.failed_at)
        .await?;

    info!(
        order_id = %event.order_id,
        previous_status = %current,
        error = %event.error_message,
        "订单已标记为 PaymentFailed"
    );
    Ok(())
}

/// 按 topic 分发单条消息
pub async fn process_payment_message(
    msg: &ConsumerMessage,
    store: &dyn OrderStatusStore,
    enforce_gate: bool,
) -> Result<()> {
    match msg.topic.as_str() {
        topics::PAYMENT_COMPLETED => {
            let event: PaymentCompleted = msg.deserialize_payload()?;
            apply_payment_completed(store, &event, enforce_gate).await
        }
        topics::PAYMENT_FAILED => {
            let event: PaymentFailed = msg.deserialize_payload()?;
            apply_payment_failed(store, &event, enforce_gate).await
        }
        other => {
            warn!(topic = other, "收到未订阅的 topic 消息，忽略");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// PaymentStatusConsumer
// ---------------------------------------------------------------------------

/// 支付结果消费者
///
/// 可重试错误按退避策略重试，重试耗尽或遇到不可重试错误后
/// 将消息写入死信队列，避免阻塞后续消息。
pub struct PaymentStatusConsumer {
    consumer: KafkaConsumer,
    store: Arc<dyn OrderStatusStore>,
    dlq: Arc<DlqProducer>,
    retry_policy: RetryPolicy,
    enforce_gate: bool,
}

impl PaymentStatusConsumer {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn OrderStatusStore>,
        producer: KafkaProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("payments"))?;
        consumer.subscribe(&[topics::PAYMENT_COMPLETED, topics::PAYMENT_FAILED])?;

        Ok(Self {
            consumer,
            store,
            dlq: Arc::new(DlqProducer::new(producer, "order-service", config)),
            retry_policy: RetryPolicy::from_kafka(&config.kafka),
            enforce_gate: config.order.enforce_status_gate,
        })
    }

    /// 启动消费循环，直到收到关闭信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let store = self.store.clone();
        let dlq = self.dlq.clone();
        let retry_policy = self.retry_policy.clone();
        let enforce_gate = self.enforce_gate;

        self.consumer
            .start(shutdown, move |msg| {
                let store = store.clone();
                let dlq = dlq.clone();
                let retry_policy = retry_policy.clone();

                async move {
                    let result = retry_with_policy(
                        &retry_policy,
                        "处理支付结果事件",
                        |e| e.is_retryable(),
                        || process_payment_message(&msg, store.as_ref(), enforce_gate),
                    )
                    .await;

                    if let Err(e) = result {
                        dlq.send_to_dlq(&msg, &e.to_string()).await?;
                    }

                    Ok(())
                }
            })
            .await;

        info!("支付结果消费循环已退出");
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
