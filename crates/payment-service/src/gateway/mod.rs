//! 支付网关抽象
//!
//! 一个能力接口，三个实现（Mock / Stripe / MercadoPago），
//! 由工厂按（配置的 provider，支付方式）在构造时选定一次。
//! 网关拒绝（如卡片被拒）通过 `success = false` 的结果表达，
//! 只有传输层故障才返回 Err。

pub mod mercadopago;
pub mod mock;
pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use shop_shared::config::PaymentConfig;
use shop_shared::error::{Result, ShopError};

use crate::model::PaymentMethod;

pub use mercadopago::MercadoPagoGateway;
pub use mock::MockGateway;
pub use stripe::StripeGateway;

// ---------------------------------------------------------------------------
// 请求 / 结果
// ---------------------------------------------------------------------------

/// 扣款请求
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    /// 支付令牌（卡片 token 或钱包授权码），永不记录原文
    pub token: String,
    pub client_email: String,
}

/// 扣款结果。success = false 表示网关受理后拒绝，不是错误
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub card_brand: Option<String>,
    pub card_last4: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// 网关原始响应，随调用记录落库
    pub raw_response: serde_json::Value,
}

/// 退款请求
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub reason: String,
}

/// 退款结果
#[derive(Debug, Clone)]
pub struct RefundResult {
    pub success: bool,
    pub refund_transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub raw_response: serde_json::Value,
}

// ---------------------------------------------------------------------------
// PaymentGateway trait 与工厂
// ---------------------------------------------------------------------------

/// 支付网关能力接口
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// 网关名称，写入 Payment.gateway 字段
    fn name(&self) -> &'static str;

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResult>;

    async fn process_refund(&self, request: &RefundRequest) -> Result<RefundResult>;
}

/// 网关工厂
///
/// provider 来自配置，支付方式来自请求；不支持的组合是配置错误，
/// 在构造时而非请求途中失败。
pub struct PaymentGatewayFactory;

impl PaymentGatewayFactory {
    pub fn create(
        config: &PaymentConfig,
        method: PaymentMethod,
    ) -> Result<Arc<dyn PaymentGateway>> {
        match config.provider.as_str() {
            // Mock 接受任意支付方式，便于联调
            "mock" => Ok(Arc::new(MockGateway::new())),
            "stripe" => match method {
                PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
                    Ok(Arc::new(StripeGateway::new(config)?))
                }
                other => Err(ShopError::Config(format!(
                    "Stripe 网关不支持支付方式 {other}"
                ))),
            },
            "mercadopago" => match method {
                PaymentMethod::MercadoPago => Ok(Arc::new(MercadoPagoGateway::new(config)?)),
                other => Err(ShopError::Config(format!(
                    "MercadoPago 网关不支持支付方式 {other}"
                ))),
            },
            other => Err(ShopError::Config(format!("未知的支付网关 provider: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_provider(provider: &str) -> PaymentConfig {
        PaymentConfig {
            provider: provider.to_string(),
            ..PaymentConfig::default()
        }
    }

    #[test]
    fn test_factory_mock_accepts_any_method() {
        let config = config_with_provider("mock");
        for method in [
            PaymentMethod::CreditCard,
            PaymentMethod::MercadoPago,
            PaymentMethod::Cash,
        ] {
            let gateway = PaymentGatewayFactory::create(&config, method).unwrap();
            assert_eq!(gateway.name(), "mock");
        }
    }

    #[test]
    fn test_factory_stripe_only_cards() {
        let config = config_with_provider("stripe");

        assert!(PaymentGatewayFactory::create(&config, PaymentMethod::CreditCard).is_ok());
        assert!(PaymentGatewayFactory::create(&config, PaymentMethod::DebitCard).is_ok());

        let result = PaymentGatewayFactory::create(&config, PaymentMethod::MercadoPago);
        assert!(matches!(result, Err(ShopError::Config(_))));
    }

    #[test]
    fn test_factory_mercadopago_only_wallet() {
        let config = config_with_provider("mercadopago");

        assert!(PaymentGatewayFactory::create(&config, PaymentMethod::MercadoPago).is_ok());
        assert!(matches!(
            PaymentGatewayFactory::create(&config, PaymentMethod::CreditCard),
            Err(ShopError::Config(_))
        ));
    }

    #[test]
    fn test_factory_unknown_provider_is_config_error() {
        let config = config_with_provider("paypal");
        assert!(matches!(
            PaymentGatewayFactory::create(&config, PaymentMethod::PayPal),
            Err(ShopError::Config(_))
        ));
    }
}
