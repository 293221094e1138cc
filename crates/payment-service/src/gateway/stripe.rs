//! Stripe 网关
//!
//! 薄封装：一次扣款一个 HTTP 调用。网关侧拒绝映射为 success = false，
//! 传输层故障（连接失败、超时）映射为 Gateway 错误。

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use shop_shared::config::PaymentConfig;
use shop_shared::error::{Result, ShopError};

use super::{PaymentGateway, PaymentRequest, PaymentResult, RefundRequest, RefundResult};

pub struct StripeGateway {
    http: reqwest::Client,
    api_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.gateway_timeout_seconds))
            .build()
            .map_err(|e| ShopError::Internal(format!("构造 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            api_url: config.stripe_api_url.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
        })
    }
}

/// 将 charge 响应体映射为统一结果
fn map_charge_response(body: Value) -> PaymentResult {
    let succeeded = body["status"].as_str() == Some("succeeded");

    if succeeded {
        PaymentResult {
            success: true,
            transaction_id: body["id"].as_str().map(String::from),
            card_brand: body["payment_method_details"]["card"]["brand"]
                .as_str()
                .map(String::from),
            card_last4: body["payment_method_details"]["card"]["last4"]
                .as_str()
                .map(String::from),
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
            error_code: body["failure_code"].as_str().map(String::from),
            error_message: body["failure_message"].as_str().map(String::from),
            raw_response: body,
        }
    }
}

fn map_refund_response(body: Value) -> RefundResult {
    let succeeded = body["status"].as_str() == Some("succeeded");
    RefundResult {
        success: succeeded,
        refund_transaction_id: succeeded.then(|| body["id"].as_str().unwrap_or("").to_string()),
        error_message: body["failure_reason"].as_str().map(String::from),
        raw_response: body,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        debug!(payment_id = %request.payment_id, "调用 Stripe 扣款接口");

        let body = self
            .http
            .post(format!("{}/v1/charges", self.api_url))
            .bearer_auth(&self.secret_key)
            .json(&json!({
                "amount": request.amount.to_string(),
                "currency": request.currency.to_lowercase(),
                "source": request.token,
                "receipt_email": request.client_email,
                "metadata": { "order_id": request.order_id },
            }))
            .send()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("Stripe 请求失败: {e}"),
            })?
            .json::<Value>()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("Stripe 响应解析失败: {e}"),
            })?;

        Ok(map_charge_response(body))
    }

    async fn process_refund(&self, request: &RefundRequest) -> Result<RefundResult> {
        let body = self
            .http
            .post(format!("{}/v1/refunds", self.api_url))
            .bearer_auth(&self.secret_key)
            .json(&json!({
                "charge": request.transaction_id,
                "amount": request.amount.to_string(),
                "reason": request.reason,
            }))
            .send()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("Stripe 退款请求失败: {e}"),
            })?
            .json::<Value>()
            .await
            .map_err(|e| ShopError::Gateway {
                code: None,
                message: format!("Stripe 退款响应解析失败: {e}"),
            })?;

        Ok(map_refund_response(body))
    }
}
