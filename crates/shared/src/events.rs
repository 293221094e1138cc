//! 集成事件契约
//!
//! 定义跨服务传输的不可变事件负载。每个事件都携带统一的元数据
//! （事件 ID、UTC 创建时间、可选的关联 ID），序列化为 camelCase JSON。
//! 事件描述已经发生的事实，发布后不可修改，消费方必须按至少一次投递语义处理。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventMeta — 事件统一元数据
// ---------------------------------------------------------------------------

/// 事件元数据，内嵌（flatten）到每个事件负载中
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// 发布时生成的唯一事件 ID
    pub event_id: Uuid,
    /// UTC 创建时间
    pub created_at: DateTime<Utc>,
    /// 跨服务链路追踪用的关联 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventMeta {
    /// 创建新的事件元数据，事件 ID 使用 UUIDv7（时间有序，便于排查）
    pub fn new() -> Self {
        Self {
            event_id: Uuid::now_v7(),
            created_at: Utc::now(),
            correlation_id: None,
        }
    }

    /// 创建携带关联 ID 的事件元数据
    pub fn with_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::new()
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// 条目快照
// ---------------------------------------------------------------------------

/// 订单行快照，随 OrderCreated / OrderCancelled 传输
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInfo {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// 购物车条目快照，随 CartAbandoned 传输
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInfo {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

// ---------------------------------------------------------------------------
// 订单事件
// ---------------------------------------------------------------------------

/// 订单创建成功（本地事务已提交、库存已同步扣减）后发布
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub total: Decimal,
    pub items: Vec<OrderItemInfo>,
}

/// 订单取消后发布，驱动库存返还等补偿动作
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub total: Decimal,
    pub cancellation_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub items: Vec<OrderItemInfo>,
    pub cancelled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// 支付事件
// ---------------------------------------------------------------------------

/// 支付成功后发布
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub amount: Decimal,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// 支付失败后发布。payment_id 可能为空——
/// 支付记录尚未落库前失败时没有可引用的 ID。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

/// 退款完成后发布
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundProcessed {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub refund_amount: Decimal,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_transaction_id: Option<String>,
    pub refunded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// 购物车 / 商品目录 / 客户事件
// ---------------------------------------------------------------------------

/// 购物车长时间未活跃被判定为放弃时发布，每个购物车至多一次
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartAbandoned {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub cart_id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub client_name: String,
    pub total: Decimal,
    pub item_count: i32,
    pub items: Vec<CartItemInfo>,
    pub last_activity_at: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
}

/// 库存变动后发布
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdated {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub product_id: Uuid,
    pub previous_stock: i32,
    pub current_stock: i32,
    pub updated_at: DateTime<Utc>,
}

impl StockUpdated {
    /// 是否由无货恢复为有货
    pub fn is_back_in_stock(&self) -> bool {
        self.previous_stock <= 0 && self.current_stock > 0
    }

    /// 是否由有货变为无货
    pub fn is_out_of_stock(&self) -> bool {
        self.previous_stock > 0 && self.current_stock <= 0
    }
}

/// 客户注册完成后发布（本核心只定义契约，不消费）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRegistered {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub customer_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub registered_at: DateTime<Utc>,
}
