//! 订单领域模型
//!
//! Order 创建后只能通过状态流转操作修改，永不删除。
//! OrderItem 是下单时刻的不可变行快照，金额字段使用 Decimal 避免浮点误差。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::state_machine::{OrderStatus, PaymentType};

/// 地址快照
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(min = 1, message = "街道不能为空"))]
    pub street: String,
    #[validate(length(min = 1, message = "城市不能为空"))]
    pub city: String,
    pub state: String,
    #[validate(length(min = 1, message = "邮编不能为空"))]
    pub zip_code: String,
    #[validate(length(min = 1, message = "国家不能为空"))]
    pub country: String,
}

/// 订单
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub status: OrderStatus,
    pub payment_type: PaymentType,
    /// 创建时固定为 Σ(行数量 × 行单价)，之后永不重算
    pub total: Decimal,
    pub shipping_street: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zip_code: String,
    pub shipping_country: String,
    pub billing_street: String,
    pub billing_city: String,
    pub billing_state: String,
    pub billing_zip_code: String,
    pub billing_country: String,
    pub payment_transaction_id: Option<String>,
    pub payment_gateway: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// 订单行快照，写入后不可变
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        let addr = Address {
            street: "中山路 1 号".to_string(),
            city: "上海".to_string(),
            state: "".to_string(),
            zip_code: "200000".to_string(),
            country: "CN".to_string(),
        };
        assert!(addr.validate().is_ok());

        let bad = Address {
            street: "".to_string(),
            ..addr
        };
        assert!(bad.validate().is_err());
    }
}
