//! 订单状态机
//!
//! 纯函数式的状态流转校验：17 个订单状态与一张允许流转表。
//! 表中没有行的状态（Cancelled、Refunded、PartiallyRefunded、Returned）
//! 允许流转到任意状态——这是刻意保留的宽松回退语义（用于人工修复误操作），
//! 不是疏漏，调用方不得自行收紧。

use serde::{Deserialize, Serialize};

/// 订单状态
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingPayment,
    PaymentProcessing,
    PaymentFailed,
    Paid,
    Processing,
    ReadyToShip,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
    PartiallyRefunded,
    ReturnRequested,
    Returned,
    OnHold,
    PaymentDisputed,
}

impl OrderStatus {
    /// 全部 17 个状态，供穷举测试与校验使用
    pub const ALL: [OrderStatus; 17] = [
        Self::AwaitingPayment,
        Self::PaymentProcessing,
        Self::PaymentFailed,
        Self::Paid,
        Self::Processing,
        Self::ReadyToShip,
        Self::Shipped,
        Self::InTransit,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
        Self::PartiallyRefunded,
        Self::ReturnRequested,
        Self::Returned,
        Self::OnHold,
        Self::PaymentDisputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AwaitingPayment",
            Self::PaymentProcessing => "PaymentProcessing",
            Self::PaymentFailed => "PaymentFailed",
            Self::Paid => "Paid",
            Self::Processing => "Processing",
            Self::ReadyToShip => "ReadyToShip",
            Self::Shipped => "Shipped",
            Self::InTransit => "InTransit",
            Self::OutForDelivery => "OutForDelivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Refunded => "Refunded",
            Self::PartiallyRefunded => "PartiallyRefunded",
            Self::ReturnRequested => "ReturnRequested",
            Self::Returned => "Returned",
            Self::OnHold => "OnHold",
            Self::PaymentDisputed => "PaymentDisputed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 支付方式
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "payment_type", rename_all = "snake_case")]
pub enum PaymentType {
    CreditCard,
    DebitCard,
    MercadoPago,
    PayPal,
    BankTransfer,
    Cash,
    Other,
}

impl PaymentType {
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

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 返回指定当前状态允许流转到的状态集合
///
/// 返回 None 表示该状态没有流转表行——按宽松回退语义允许任意流转。
pub fn transitions_for(current: OrderStatus) -> Option<&'static [OrderStatus]> {
    use OrderStatus::*;

    match current {
        AwaitingPayment => Some(&[PaymentProcessing, Paid, PaymentFailed, Cancelled]),
        PaymentProcessing => Some(&[Paid, PaymentFailed, Cancelled]),
        PaymentFailed => Some(&[PaymentProcessing, Cancelled]),
        Paid => Some(&[Processing, Refunded, Cancelled]),
        Processing => Some(&[ReadyToShip, OnHold, Cancelled]),
        ReadyToShip => Some(&[Shipped, OnHold]),
        Shipped => Some(&[InTransit, Delivered, ReturnRequested]),
        InTransit => Some(&[OutForDelivery, Delivered, ReturnRequested]),
        OutForDelivery => Some(&[Delivered, ReturnRequested]),
        Delivered => Some(&[ReturnRequested]),
        OnHold => Some(&[Processing, Cancelled]),
        ReturnRequested => Some(&[Returned, Cancelled]),
        PaymentDisputed => Some(&[Refunded, Cancelled]),
        // 无流转表行：允许任意流转
        Cancelled | Refunded | PartiallyRefunded | Returned => None,
    }
}

/// 校验从 current 到 next 的流转是否允许
pub fn can_transition(current: OrderStatus, next: OrderStatus) -> bool {
    match transitions_for(current) {
        Some(allowed) => allowed.contains(&next),
        None => true,
    }
}
