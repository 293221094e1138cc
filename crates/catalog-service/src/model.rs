//! 库存领域模型与接口 DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// 商品库存行
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub product_id: Uuid,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

/// 库存动作：Add 返还/入库，Subtract 扣减
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockAction {
    Add,
    Subtract,
}

/// 单项库存变更
///
/// 校验失败的报告里会带上字段值，因此条目类型同时实现 Serialize。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdateItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "数量必须大于 0"))]
    pub quantity: i32,
    pub action: StockAction,
}

/// 批量库存更新请求（订单服务同步调用）
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StockUpdateRequest {
    #[validate(length(min = 1, message = "变更列表不能为空"), nested)]
    pub items: Vec<StockUpdateItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_client_shape() {
        let json = r#"{"items":[{"productId":"018f4e9a-0000-7000-8000-000000000001","quantity":2,"action":"Subtract"}]}"#;
        let req: StockUpdateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.items.len(), 1);
        assert_eq!(req.items[0].quantity, 2);
        assert_eq!(req.items[0].action, StockAction::Subtract);
    }

    #[test]
    fn test_request_validation() {
        let empty = StockUpdateRequest { items: vec![] };
        assert!(empty.validate().is_err());

        let zero = StockUpdateRequest {
            items: vec![StockUpdateItem {
                product_id: Uuid::now_v7(),
                quantity: 0,
                action: StockAction::Add,
            }],
        };
        assert!(zero.validate().is_err());
    }
}
