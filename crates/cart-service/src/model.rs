//! 购物车领域模型
//!
//! 购物车是客户持有的聚合：一个客户至多一个活跃购物车。
//! 客户邮箱与姓名从客户表联查得到，随聚合一起读出以便构造事件。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// 购物车聚合头
#[derive(Debug, Clone, FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub created_at: DateTime<Utc>,
    /// 每次条目变更时刷新，放弃判定以此为准
    pub updated_at: DateTime<Utc>,
    /// 已发布过 CartAbandoned 的时间，保证每个购物车至多通知一次
    pub abandonment_notified_at: Option<DateTime<Utc>>,
}

/// 购物车条目
#[derive(Debug, Clone, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_line_total() {
        let item = CartItem {
            id: Uuid::now_v7(),
            cart_id: Uuid::now_v7(),
            product_id: Uuid::now_v7(),
            product_name: "键盘".to_string(),
            quantity: 3,
            unit_price: dec!(12.50),
        };
        assert_eq!(item.line_total(), dec!(37.50));
    }
}
