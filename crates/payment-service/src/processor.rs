//! 支付编排器
//!
//! 一次支付的完整流程：落库 Pending → 调用网关一次 → 追加调用记录 →
//! 按结果标记 Completed / Failed 并发布对应事件。
//! 网关层面的任何失败（拒绝或传输故障）都不是编排错误：
//! 它变成一次记录在案的失败支付。本组件内不做重试。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use shop_shared::config::PaymentConfig;
use shop_shared::error::{Result, ShopError};
use shop_shared::events::{EventMeta, PaymentCompleted, PaymentFailed, RefundProcessed};
use shop_shared::kafka::{EventPublisher, publish_json, topics};

use crate::gateway::{
    PaymentGateway, PaymentGatewayFactory, PaymentRequest, PaymentResult, RefundRequest,
};
use crate::model::{
    Payment, PaymentDetail, PaymentMethod, PaymentStatus, PaymentTransaction, TransactionType,
};
use crate::store::PaymentStore;

// ---------------------------------------------------------------------------
// 命令
// ---------------------------------------------------------------------------

fn validate_amount(amount: &Decimal) -> std::result::Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("金额必须大于 0".into());
        Err(err)
    }
}

/// 支付处理命令
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentCommand {
    pub order_id: Uuid,
    pub client_id: Uuid,
    #[validate(email(message = "邮箱格式无效"))]
    pub client_email: String,
    #[validate(length(min = 1, message = "客户姓名不能为空"))]
    pub client_name: String,
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    /// 缺省时使用配置的默认币种
    #[serde(default)]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    #[validate(length(min = 1, message = "支付令牌不能为空"))]
    pub token: String,
}

/// 退款命令
///
/// 金额为正且不超过原支付金额的约束中，前者在命令校验时检查，
/// 后者需要查出支付记录后在 [`PaymentProcessor::refund`] 里检查。
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundCommand {
    #[validate(length(min = 1, message = "退款原因不能为空"))]
    pub reason: String,
    /// 缺省时全额退款
    #[serde(default)]
    #[validate(custom(function = "validate_amount"))]
    pub amount: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// PaymentProcessor
// ---------------------------------------------------------------------------

/// 支付编排器
pub struct PaymentProcessor {
    store: Arc<dyn PaymentStore>,
    publisher: Arc<dyn EventPublisher>,
    config: PaymentConfig,
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        publisher: Arc<dyn EventPublisher>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    fn gateway_for(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>> {
        PaymentGatewayFactory::create(&self.config, method)
    }

    /// 处理一次支付
    #[instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn process(&self, cmd: ProcessPaymentCommand) -> Result<Payment> {
        cmd.validate()?;

        let gateway = self.gateway_for(cmd.method)?;
        let payment_id = Uuid::now_v7();
        let currency = cmd
            .currency
            .clone()
            .unwrap_or_else(|| self.config.currency.clone());
        let now = Utc::now();

        let payment = Payment {
            id: payment_id,
            order_id: cmd.order_id,
            client_id: cmd.client_id,
            client_email: cmd.client_email.clone(),
            client_name: cmd.client_name.clone(),
            amount: cmd.amount,
            currency: currency.clone(),
            status: PaymentStatus::Pending,
            method: cmd.method,
            transaction_id: None,
            gateway: gateway.name().to_string(),
            error_message: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_pending(&payment).await?;

        let request = PaymentRequest {
            payment_id,
            order_id: cmd.order_id,
            amount: cmd.amount,
            currency,
            method: cmd.method,
            token: cmd.token.clone(),
            client_email: cmd.client_email.clone(),
        };

        // 只调用一次。传输层故障合成为失败结果，与网关拒绝走同一条失败路径
        let result = match gateway.process_payment(&request).await {
            Ok(result) => result,
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "网关调用故障");
                PaymentResult {
                    success: false,
                    transaction_id: None,
                    card_brand: None,
                    card_last4: None,
                    error_code: None,
                    error_message: Some(e.to_string()),
                    raw_response: serde_json::json!({ "error": e.to_string() }),
                }
            }
        };

        self.store
            .record_attempt(&PaymentTransaction {
                id: Uuid::now_v7(),
                payment_id,
                transaction_type: TransactionType::Charge,
                amount: cmd.amount,
                success: result.success,
                gateway_response: result.raw_response.clone(),
                error_message: result.error_message.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if result.success {
            self.complete(&payment, &result).await?;
        } else {
            self.fail(&payment, &result).await?;
        }

        self.store.find(payment_id).await
    }

    async fn complete(&self, payment: &Payment, result: &PaymentResult) -> Result<()> {
        let transaction_id = result.transaction_id.clone().unwrap_or_default();
        let paid_at = Utc::now();

        self.store
            .save_detail(&PaymentDetail {
                id: Uuid::now_v7(),
                payment_id: payment.id,
                card_brand: result.card_brand.clone(),
                card_last4: result.card_last4.clone(),
                billing_email: payment.client_email.clone(),
            })
            .await?;
        self.store
            .mark_completed(payment.id, &transaction_id, paid_at)
            .await?;

        info!(payment_id = %payment.id, transaction_id, "支付成功");

        let event = PaymentCompleted {
            meta: EventMeta::new(),
            payment_id: payment.id,
            order_id: payment.order_id,
            client_id: payment.client_id,
            client_email: payment.client_email.clone(),
            client_name: payment.client_name.clone(),
            amount: payment.amount,
            payment_method: payment.method.to_string(),
            transaction_id: result.transaction_id.clone(),
            paid_at,
        };
        publish_json(
            self.publisher.as_ref(),
            topics::PAYMENT_COMPLETED,
            &payment.order_id.to_string(),
            &event,
        )
        .await
    }

    async fn fail(&self, payment: &Payment, result: &PaymentResult) -> Result<()> {
        let error_message = result
            .error_message
            .clone()
            .unwrap_or_else(|| "网关未提供失败原因".to_string());

        self.store.mark_failed(payment.id, &error_message).await?;

        info!(payment_id = %payment.id, error = %error_message, "支付失败");

        let event = PaymentFailed {
            meta: EventMeta::new(),
            payment_id: Some(payment.id),
            order_id: payment.order_id,
            client_id: payment.client_id,
            client_email: payment.client_email.clone(),
            amount: payment.amount,
            error_code: result.error_code.clone(),
            error_message,
            failed_at: Utc::now(),
        };
        publish_json(
            self.publisher.as_ref(),
            topics::PAYMENT_FAILED,
            &payment.order_id.to_string(),
            &event,
        )
        .await
    }

    /// 处理一次退款，流程与支付对称
    #[instrument(skip(self, cmd))]
    pub async fn refund(&self, payment_id: Uuid, cmd: RefundCommand) -> Result<Payment> {
        cmd.validate()?;

        let payment = self.store.find(payment_id).await?;

        // 只有已完成且持有网关交易号的支付才能退款
        if payment.status != PaymentStatus::Completed || payment.transaction_id.is_none() {
            return Err(ShopError::InvalidStateTransition {
                current: format!("{:?}", payment.status),
                requested: "Refunded".to_string(),
            });
        }

        let transaction_id = payment.transaction_id.clone().unwrap_or_default();
        let amount = cmd.amount.unwrap_or(payment.amount);
        if amount > payment.amount {
            return Err(ShopError::validation(
                "amount",
                "退款金额不能超过原支付金额",
            ));
        }
        let gateway = self.gateway_for(payment.method)?;

        let request = RefundRequest {
            payment_id,
            transaction_id,
            amount,
            reason: cmd.reason.clone(),
        };

        let result = match gateway.process_refund(&request).await {
            Ok(result) => result,
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "退款网关调用故障");
                crate::gateway::RefundResult {
                    success: false,
                    refund_transaction_id: None,
                    error_message: Some(e.to_string()),
                    raw_response: serde_json::json!({ "error": e.to_string() }),
                }
            }
        };

        self.store
            .record_attempt(&PaymentTransaction {
                id: Uuid::now_v7(),
                payment_id,
                transaction_type: TransactionType::Refund,
                amount,
                success: result.success,
                gateway_response: result.raw_response.clone(),
                error_message: result.error_message.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if !result.success {
            // 支付状态不变，失败已入调用记录，错误返回给调用方
            return Err(ShopError::Gateway {
                code: None,
                message: result
                    .error_message
                    .unwrap_or_else(|| "退款被网关拒绝".to_string()),
            });
        }

        self.store
            .mark_refunded(payment_id, result.refund_transaction_id.as_deref())
            .await?;

        info!(payment_id = %payment_id, amount = %amount, "退款成功");

        let event = RefundProcessed {
            meta: EventMeta::new(),
            payment_id,
            order_id: payment.order_id,
            client_id: payment.client_id,
            client_email: payment.client_email.clone(),
            refund_amount: amount,
            reason: cmd.reason,
            refund_transaction_id: result.refund_transaction_id,
            refunded_at: Utc::now(),
        };
        publish_json(
            self.publisher.as_ref(),
            topics::PAYMENT_REFUNDED,
            &payment.order_id.to_string(),
            &event,
        )
        .await?;

        self.store.find(payment_id).await
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 内存支付存储
    #[derive(Default)]
    struct MemoryPaymentStore {
        payments: Mutex<HashMap<Uuid, Payment>>,
        attempts: Mutex<Vec<PaymentTransaction>>,
        details: Mutex<Vec<PaymentDetail>>,
    }

    impl MemoryPaymentStore {
        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentStore for MemoryPaymentStore {
        async fn insert_pending(&self, payment: &Payment) -> Result<()> {
            self.payments
                .lock()
                .unwrap()
                .insert(payment.id, payment.clone());
            Ok(())
        }

        async fn record_attempt(&self, attempt: &PaymentTransaction) -> Result<()> {
            self.attempts.lock().unwrap().push(attempt.clone());
            Ok(())
        }

        async fn save_detail(&self, detail: &PaymentDetail) -> Result<()> {
            self.details.lock().unwrap().push(detail.clone());
            Ok(())
        }

        async fn mark_completed(
            &self,
            payment_id: Uuid,
            transaction_id: &str,
            paid_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut payments = self.payments.lock().unwrap();
            if let Some(p) = payments.get_mut(&payment_id) {
                p.status = PaymentStatus::Completed;
                p.transaction_id = Some(transaction_id.to_string());
                p.paid_at = Some(paid_at);
            }
            Ok(())
        }

        async fn mark_failed(&self, payment_id: Uuid, error_message: &str) -> Result<()> {
            let mut payments = self.payments.lock().unwrap();
            if let Some(p) = payments.get_mut(&payment_id) {
                p.status = PaymentStatus::Failed;
                p.error_message = Some(error_message.to_string());
            }
            Ok(())
        }

        async fn mark_refunded(
            &self,
            payment_id: Uuid,
            refund_transaction_id: Option<&str>,
        ) -> Result<()> {
            let mut payments = self.payments.lock().unwrap();
            if let Some(p) = payments.get_mut(&payment_id) {
                p.status = PaymentStatus::Refunded;
                if let Some(id) = refund_transaction_id {
                    p.transaction_id = Some(id.to_string());
                }
            }
            Ok(())
        }

        async fn find(&self, payment_id: Uuid) -> Result<Payment> {
            self.payments
                .lock()
                .unwrap()
                .get(&payment_id)
                .cloned()
                .ok_or_else(|| ShopError::not_found("Payment", payment_id))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, _key: &str, payload: Vec<u8>) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn mock_config() -> PaymentConfig {
        PaymentConfig {
            provider: "mock".to_string(),
            ..PaymentConfig::default()
        }
    }

    fn command(amount: Decimal, token: &str) -> ProcessPaymentCommand {
        ProcessPaymentCommand {
            order_id: Uuid::now_v7(),
            client_id: Uuid::now_v7(),
            client_email: "alice@example.com".to_string(),
            client_name: "Alice".to_string(),
            amount,
            currency: None,
            method: PaymentMethod::CreditCard,
            token: token.to_string(),
        }
    }

    fn processor(
        store: Arc<MemoryPaymentStore>,
        publisher: Arc<RecordingPublisher>,
    ) -> PaymentProcessor {
        PaymentProcessor::new(store, publisher, mock_config())
    }

    #[tokio::test]
    async fn test_successful_payment_flow() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let payment = processor.process(command(dec!(100), "tok_visa")).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.transaction_id.as_deref().unwrap().starts_with("MOCK_"));
        assert!(payment.paid_at.is_some());
        assert_eq!(payment.currency, "USD");

        // 恰好一次网关调用记录，成功
        assert_eq!(store.attempt_count(), 1);
        let attempts = store.attempts.lock().unwrap();
        assert_eq!(attempts[0].transaction_type, TransactionType::Charge);
        assert!(attempts[0].success);
        drop(attempts);

        // 卡片快照已脱敏保存
        let details = store.details.lock().unwrap();
        assert_eq!(details.len(), 1);
        assert!(details[0].card_brand.is_some());
        drop(details);

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::PAYMENT_COMPLETED);
        let event: PaymentCompleted = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(event.payment_id, payment.id);
        assert_eq!(event.amount, dec!(100));
    }

    /// 网关拒绝：支付标记失败、调用记录保留、PaymentFailed 发布，流程本身不报错
    #[tokio::test]
    async fn test_declined_payment_flow() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let payment = processor.process(command(dec!(9999), "tok_visa")).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(payment.transaction_id.is_none());
        assert!(payment.error_message.is_some());

        assert_eq!(store.attempt_count(), 1);
        assert!(!store.attempts.lock().unwrap()[0].success);
        // 失败的支付不保存卡片快照
        assert!(store.details.lock().unwrap().is_empty());

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent[0].0, topics::PAYMENT_FAILED);
        let event: PaymentFailed = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(event.payment_id, Some(payment.id));
        assert_eq!(event.error_code.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn test_validation_rejects_non_positive_amount() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let result = processor.process(command(dec!(0), "tok_visa")).await;

        assert!(matches!(result, Err(ShopError::Validation { .. })));
        // 校验失败发生在任何写入之前
        assert!(store.payments.lock().unwrap().is_empty());
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_flow() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        // 先走一次成功支付
        let payment = processor.process(command(dec!(80), "tok_visa")).await.unwrap();

        let refunded = processor
            .refund(
                payment.id,
                RefundCommand {
                    reason: "客户要求退款".to_string(),
                    amount: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(refunded.status, PaymentStatus::Refunded);
        // Charge + Refund 两条调用记录
        assert_eq!(store.attempt_count(), 2);
        assert_eq!(
            store.attempts.lock().unwrap()[1].transaction_type,
            TransactionType::Refund
        );

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().0, topics::PAYMENT_REFUNDED);
        let event: RefundProcessed = serde_json::from_slice(&sent.last().unwrap().1).unwrap();
        assert_eq!(event.refund_amount, dec!(80));
    }

    /// 部分退款使用命令金额
    #[tokio::test]
    async fn test_partial_refund_uses_command_amount() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let payment = processor.process(command(dec!(80), "tok_visa")).await.unwrap();

        processor
            .refund(
                payment.id,
                RefundCommand {
                    reason: "部分商品缺货".to_string(),
                    amount: Some(dec!(30)),
                },
            )
            .await
            .unwrap();

        let sent = publisher.sent.lock().unwrap();
        let event: RefundProcessed = serde_json::from_slice(&sent.last().unwrap().1).unwrap();
        assert_eq!(event.refund_amount, dec!(30));
    }

    /// 非正的退款金额在任何网关调用之前被拒绝
    #[tokio::test]
    async fn test_refund_rejects_non_positive_amount() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let payment = processor.process(command(dec!(80), "tok_visa")).await.unwrap();

        let result = processor
            .refund(
                payment.id,
                RefundCommand {
                    reason: "客户要求退款".to_string(),
                    amount: Some(dec!(-50)),
                },
            )
            .await;

        assert!(matches!(result, Err(ShopError::Validation { .. })));
        // 没有产生退款调用记录，支付保持 Completed
        assert_eq!(store.attempt_count(), 1);
        let unchanged = store.find(payment.id).await.unwrap();
        assert_eq!(unchanged.status, PaymentStatus::Completed);
    }

    /// 超过原支付金额的退款被拒绝
    #[tokio::test]
    async fn test_refund_rejects_amount_exceeding_payment() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        let payment = processor.process(command(dec!(80), "tok_visa")).await.unwrap();

        let result = processor
            .refund(
                payment.id,
                RefundCommand {
                    reason: "客户要求退款".to_string(),
                    amount: Some(dec!(100)),
                },
            )
            .await;

        assert!(matches!(result, Err(ShopError::Validation { .. })));
        assert_eq!(store.attempt_count(), 1);
        assert_eq!(
            store.find(payment.id).await.unwrap().status,
            PaymentStatus::Completed
        );
    }

    /// 未完成的支付不能退款
    #[tokio::test]
    async fn test_refund_rejects_non_completed_payment() {
        let store = Arc::new(MemoryPaymentStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(store.clone(), publisher.clone());

        // 失败的支付
        let payment = processor.process(command(dec!(9999), "tok_visa")).await.unwrap();

        let result = processor
            .refund(
                payment.id,
                RefundCommand {
                    reason: "客户要求退款".to_string(),
                    amount: None,
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(ShopError::InvalidStateTransition { .. })
        ));
    }
}
