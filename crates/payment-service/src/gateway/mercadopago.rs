//! MercadoPago 网关
//!
//! 与 Stripe 实现同构：一次调用、拒绝是结果、传输故障才是错误。

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use shop_shared::config::PaymentConfig;
use shop_shared::error::{Result, ShopError};

use super::{PaymentGateway, PaymentRequest, PaymentResult, RefundRequest, RefundResult};

pub struct MercadoPagoGateway {
    http: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl MercadoPagoGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.gateway_timeout_seconds))
            .build()
            .map_err(|e| ShopError::Internal(format!("构造 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            api_url: config.mercadopago_api_url.trim_end_matches('/').to_string(),
            access_token: config.mercadopago_access_token.clone(),
        })
    }
}

fn map_payment_response(body: Value) -> PaymentResult {
    let approved = body["status"].as_str() == Some("approved");

    if approved {
        PaymentResult {
            success: true,
            transaction_id: body["id"].as_i64().map(|id| id.to_string()),
            card_brand: body["payment_method_id"].as_str().map(String::from),
            card_last4: body["card"]["last_four_digits"].as_str().map(String::from),
            error_code: None,
            error_message: None,
            raw_response: body,
        }
    } else {
        PaymentResult {
            success: false,
            transaction_id: None,
            card_brand: None,
            card_last4: None,
            error_code: body["status_detail"].as_str().map(String::from),
            error_message: body["status_detail"].as_str().map(String::from),
            raw_response: body,
        }
    }
}

fn map_refund_response(body: Value) -> RefundResult {
    let approved = body["status"].as_str() == Some("approved");
    RefundResult {
        success: approved,
        refund_transaction_id: approved
            .then(|| body["id"].as_i64().map(|id| id.to_string()))
            .flatten(),
        error_message: (!approved)
            .then(|| body["status_detail"].as_str().map(String::from))
            .flatten(),
        raw_response: body,
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        debug!(payment_id = %request.payment_id, "调用 MercadoPago 扣款接口");

        let body = self
            .http
            .post(format!("{}/v1/payments", self.api_url))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "transaction_amount": request.amount.to_string(),
                "token": request.token,
                "payer": { "email": request.client_email },
                "external_reference": request.order_id,
            }))
            .send()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("MercadoPago 请求失败: {e}"),
            })?
            .json::<Value>()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("MercadoPago 响应解析失败: {e}"),
            })?;

        Ok(map_payment_response(body))
    }

    async fn process_refund(&self, request: &RefundRequest) -> Result<RefundResult> {
        let body = self
            .http
            .post(format!(
                "{}/v1/payments/{}/refunds",
                self.api_url, request.transaction_id
            ))
            .bearer_auth(&self.access_token)
            .json(&json!({ "amount": request.amount.to_string() }))
            .send()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("MercadoPago 退款请求失败: {e}"),
            })?
            .json::<Value>()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("MercadoPago 退款响应解析失败: {e}"),
            })?;

        Ok(map_refund_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_approved_payment() {
        let result = map_payment_response(json!({
            "id": 123456789,
            "status": "approved",
            "payment_method_id": "master",
            "card": { "last_four_digits": "6351" },
        }));

        assert!(result.success);
        assert_eq!(result.transaction_id.as_deref(), Some("123456789"));
        assert_eq!(result.card_last4.as_deref(), Some("6351"));
    }

    #[test]
    fn test_map_rejected_payment() {
        let result = map_payment_response(json!({
            "status": "rejected",
            "status_detail": "cc_rejected_insufficient_amount",
        }));

        assert!(!result.success);
        assert_eq!(
            result.error_code.as_deref(),
            Some("cc_rejected_insufficient_amount")
        );
    }
}
