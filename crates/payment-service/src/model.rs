//! 支付领域模型
//!
//! Payment 是聚合根；PaymentDetail 记录脱敏后的卡片信息（品牌 + 后四位，
//! 永不存储完整卡号）；PaymentTransaction 是只追加的网关调用记录，
//! 每次 Charge / Refund 尝试一行，无论成败。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 支付方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    MercadoPago,
    PayPal,
    BankTransfer,
    Cash,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "CreditCard",
            Self::DebitCard => "DebitCard",
            Self::MercadoPago => "MercadoPago",
            Self::PayPal => "PayPal",
            Self::BankTransfer => "BankTransfer",
            Self::Cash => "Cash",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 支付状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// 网关调用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
pub enum TransactionType {
    Charge,
    Refund,
}

/// 支付聚合根
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    /// 网关返回的交易号，成功后填充
    pub transaction_id: Option<String>,
    pub gateway: String,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 脱敏的卡片信息快照
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub card_brand: Option<String>,
    pub card_last4: Option<String>,
    pub billing_email: String,
}

/// 只追加的网关调用记录
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub success: bool,
    /// 网关原始响应（JSON），排障时对照网关侧记录
    pub gateway_response: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
