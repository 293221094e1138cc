//! Mock 支付网关
//!
//! 完全确定性的测试替身：失败由令牌哨兵或金额阈值触发，
//! 卡片品牌与后四位从令牌哈希派生，同一令牌永远得到同样的卡片信息。

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use shop_shared::error::Result;

use super::{PaymentGateway, PaymentRequest, PaymentResult, RefundRequest, RefundResult};

/// 触发失败的令牌哨兵，优先于金额阈值判定
pub const MOCK_FAIL_TOKEN: &str = "MOCK_FAIL_TOKEN";

/// 金额达到该阈值即拒绝
const FAILURE_AMOUNT_THRESHOLD: u32 = 9999;

const CARD_BRANDS: [&str; 4] = ["Visa", "Mastercard", "Amex", "Discover"];

pub struct MockGateway;

impl MockGateway {
    pub fn new() -> Self {
        Self
    }

    fn token_hash(token: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }

    fn card_brand(token: &str) -> &'static str {
        CARD_BRANDS[(Self::token_hash(token) % CARD_BRANDS.len() as u64) as usize]
    }

    fn card_last4(token: &str) -> String {
        format!("{:04}", Self::token_hash(token) % 10_000)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        debug!(payment_id = %request.payment_id, amount = %request.amount, "mock 网关处理扣款");

        // 哨兵优先于金额阈值
        if request.token == MOCK_FAIL_TOKEN {
            return Ok(PaymentResult {
                success: false,
                transaction_id: None,
                card_brand: None,
                card_last4: None,
                error_code: Some("card_declined".to_string()),
                error_message: Some("模拟网关拒绝：失败令牌".to_string()),
                raw_response: json!({ "gateway": "mock", "decline_reason": "fail_token" }),
            });
        }

        if request.amount >= Decimal::from(FAILURE_AMOUNT_THRESHOLD) {
            return Ok(PaymentResult {
                success: false,
                transaction_id: None,
                card_brand: None,
                card_last4: None,
                error_code: Some("insufficient_funds".to_string()),
                error_message: Some("模拟网关拒绝：金额超过阈值".to_string()),
                raw_response: json!({ "gateway": "mock", "decline_reason": "amount_threshold" }),
            });
        }

        let transaction_id = format!(
            "MOCK_{}_{:08X}",
            Utc::now().timestamp(),
            Self::token_hash(&request.token) as u32
        );

        Ok(PaymentResult {
            success: true,
            transaction_id: Some(transaction_id.clone()),
            card_brand: Some(Self::card_brand(&request.token).to_string()),
            card_last4: Some(Self::card_last4(&request.token)),
            error_code: None,
            error_message: None,
            raw_response: json!({ "gateway": "mock", "transaction_id": transaction_id }),
        })
    }

    async fn process_refund(&self, request: &RefundRequest) -> Result<RefundResult> {
        // 只认自己签发的交易号
        if !request.transaction_id.starts_with("MOCK_") {
            return Ok(RefundResult {
                success: false,
                refund_transaction_id: None,
                error_message: Some(format!("未知的交易号: {}", request.transaction_id)),
                raw_response: json!({ "gateway": "mock", "decline_reason": "unknown_transaction" }),
            });
        }

        let refund_id = format!(
            "REFUND_{}_{:08X}",
            Utc::now().timestamp(),
            Self::token_hash(&request.transaction_id) as u32
        );

        Ok(RefundResult {
            success: true,
            refund_transaction_id: Some(refund_id.clone()),
            error_message: None,
            raw_response: json!({ "gateway": "mock", "refund_transaction_id": refund_id }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentMethod;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn request(amount: Decimal, token: &str) -> PaymentRequest {
        PaymentRequest {
            payment_id: Uuid::now_v7(),
            order_id: Uuid::now_v7(),
            amount,
            currency: "USD".to_string(),
            method: PaymentMethod::CreditCard,
            token: token.to_string(),
            client_email: "alice@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_normal_amount_succeeds() {
        let gateway = MockGateway::new();
        let result = gateway
            .process_payment(&request(dec!(100), "tok_visa"))
            .await
            .unwrap();

        assert!(result.success);
        let txn = result.transaction_id.unwrap();
        assert!(txn.starts_with("MOCK_"));
        assert!(!txn.is_empty());
        assert!(result.card_brand.is_some());
        assert_eq!(result.card_last4.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_threshold_amount_fails() {
        let gateway = MockGateway::new();
        let result = gateway
            .process_payment(&request(dec!(9999), "tok_visa"))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.transaction_id.is_none());
        assert_eq!(result.error_code.as_deref(), Some("insufficient_funds"));
    }

    /// 哨兵令牌失败与金额无关
    #[tokio::test]
    async fn test_fail_token_overrides_amount() {
        let gateway = MockGateway::new();
        let result = gateway
            .process_payment(&request(dec!(100), MOCK_FAIL_TOKEN))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("card_declined"));
    }

    /// 同一令牌永远派生出相同的卡片信息
    #[tokio::test]
    async fn test_card_info_is_deterministic() {
        let gateway = MockGateway::new();
        let a = gateway
            .process_payment(&request(dec!(50), "tok_repeat"))
            .await
            .unwrap();
        let b = gateway
            .process_payment(&request(dec!(75), "tok_repeat"))
            .await
            .unwrap();

        assert_eq!(a.card_brand, b.card_brand);
        assert_eq!(a.card_last4, b.card_last4);
    }

    #[tokio::test]
    async fn test_refund_requires_own_transaction() {
        let gateway = MockGateway::new();

        let ok = gateway
            .process_refund(&RefundRequest {
                payment_id: Uuid::now_v7(),
                transaction_id: "MOCK_1700000000_DEADBEEF".to_string(),
                amount: dec!(25.00),
                reason: "客户要求退款".to_string(),
            })
            .await
            .unwrap();
        assert!(ok.success);
        assert!(ok.refund_transaction_id.unwrap().starts_with("REFUND_"));

        let bad = gateway
            .process_refund(&RefundRequest {
                payment_id: Uuid::now_v7(),
                transaction_id: "ch_stripe_123".to_string(),
                amount: dec!(25.00),
                reason: "客户要求退款".to_string(),
            })
            .await
            .unwrap();
        assert!(!bad.success);
        assert!(bad.refund_transaction_id.is_none());
    }
}
