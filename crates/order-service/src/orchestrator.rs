//! 订单创建编排器
//!
//! 在一个本地事务内完成：行快照构建、订单与订单行落库、
//! 同步调用商品目录服务扣减库存、提交。提交后发布 OrderCreated（即发即忘）。
//!
//! 本地提交与远端扣库存并不原子：远端调用失败时本地事务回滚（不会残留订单）；
//! 远端成功后本地提交失败时库存与订单状态会发散，且没有补偿动作。
//! 这是已知的一致性缺口，保留原有行为；`stock_mode = "compensate"`
//! 提供先提交后扣减、失败时取消订单的 saga 式替代路径。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use shop_shared::error::Result;
use shop_shared::events::{EventMeta, OrderCreated, OrderItemInfo};
use shop_shared::kafka::{EventPublisher, publish_json, topics};

use crate::catalog_client::{CatalogStockApi, StockAction, StockChange};
use crate::model::{Address, Order, OrderItem};
use crate::state_machine::{OrderStatus, PaymentType};
use crate::store::PgOrderStore;

// ---------------------------------------------------------------------------
// 命令与校验
// ---------------------------------------------------------------------------

/// 订单行输入。价格由调用方提供，刻意不与当前目录价格比对——
/// 行快照记录的就是下单时刻调用方可见的价格。
/// 校验失败的报告里会带上字段值，因此同时实现 Serialize。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "数量必须大于 0"))]
    pub quantity: i32,
    #[validate(custom(function = "validate_price"))]
    pub price: Decimal,
}

fn validate_price(price: &Decimal) -> std::result::Result<(), ValidationError> {
    if *price > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("价格必须大于 0".into());
        Err(err)
    }
}

/// 订单创建命令
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateCommand {
    pub client_id: Uuid,
    #[validate(email(message = "邮箱格式无效"))]
    pub client_email: String,
    #[validate(length(min = 1, message = "客户姓名不能为空"))]
    pub client_name: String,
    pub payment_type: PaymentType,
    #[validate(nested)]
    pub shipping_address: Address,
    #[serde(default)]
    #[validate(nested)]
    pub billing_address: Option<Address>,
    /// 为 true 时账单地址取发货地址
    #[serde(default)]
    pub billing_same_as_shipping: bool,
    #[validate(length(min = 1, message = "订单行不能为空"), nested)]
    pub items: Vec<OrderLineInput>,
}

/// 解析账单地址：标记同发货地址、或未提供账单地址时，回退到发货地址
pub fn resolve_billing(cmd: &OrderCreateCommand) -> Address {
    if cmd.billing_same_as_shipping {
        return cmd.shipping_address.clone();
    }
    cmd.billing_address
        .clone()
        .unwrap_or_else(|| cmd.shipping_address.clone())
}

/// 构建不可变订单行快照，line_total = 数量 × 单价
pub fn build_line_items(order_id: Uuid, lines: &[OrderLineInput]) -> Vec<OrderItem> {
    lines
        .iter()
        .map(|line| OrderItem {
            id: Uuid::now_v7(),
            order_id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.price,
            line_total: line.price * Decimal::from(line.quantity),
        })
        .collect()
}

/// 订单总额 = Σ(行小计)，创建时固定
pub fn order_total(items: &[OrderItem]) -> Decimal {
    items.iter().map(|i| i.line_total).sum()
}

// ---------------------------------------------------------------------------
// 库存扣减模式
// ---------------------------------------------------------------------------

/// 库存扣减与本地事务的先后关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockMode {
    /// 事务内同步扣减，扣减成功才提交（参考行为，默认）
    InTransaction,
    /// 先提交再扣减，扣减失败时取消订单（saga 式补偿路径）
    Compensate,
}

impl StockMode {
    pub fn from_config(value: &str) -> Self {
        match value {
            "compensate" => Self::Compensate,
            "in_transaction" => Self::InTransaction,
            other => {
                warn!(stock_mode = other, "未知的库存扣减模式，回退到 in_transaction");
                Self::InTransaction
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OrderCreateHandler
// ---------------------------------------------------------------------------

/// 订单创建处理器
pub struct OrderCreateHandler {
    pool: PgPool,
    store: PgOrderStore,
    catalog: Arc<dyn CatalogStockApi>,
    publisher: Arc<dyn EventPublisher>,
    stock_mode: StockMode,
}

impl OrderCreateHandler {
    pub fn new(
        pool: PgPool,
        catalog: Arc<dyn CatalogStockApi>,
        publisher: Arc<dyn EventPublisher>,
        stock_mode: StockMode,
    ) -> Self {
        let store = PgOrderStore::new(pool.clone());
        Self {
            pool,
            store,
            catalog,
            publisher,
            stock_mode,
        }
    }

    /// 处理订单创建命令
    ///
    /// 校验失败在任何写入之前拒绝；库存扣减失败时按 stock_mode
    /// 回滚或补偿，并将错误返回给调用方。
    #[instrument(skip(self, cmd), fields(client_id = %cmd.client_id))]
    pub async fn handle(&self, cmd: OrderCreateCommand) -> Result<Order> {
        cmd.validate()?;

        let order_id = Uuid::now_v7();
        let items = build_line_items(order_id, &cmd.items);
        let total = order_total(&items);
        let billing = resolve_billing(&cmd);
        let now = Utc::now();

        let order = Order {
            id: order_id,
            client_id: cmd.client_id,
            client_email: cmd.client_email.clone(),
            client_name: cmd.client_name.clone(),
            status: OrderStatus::AwaitingPayment,
            payment_type: cmd.payment_type,
            total,
            shipping_street: cmd.shipping_address.street.clone(),
            shipping_city: cmd.shipping_address.city.clone(),
            shipping_state: cmd.shipping_address.state.clone(),
            shipping_zip_code: cmd.shipping_address.zip_code.clone(),
            shipping_country: cmd.shipping_address.country.clone(),
            billing_street: billing.street,
            billing_city: billing.city,
            billing_state: billing.state,
            billing_zip_code: billing.zip_code,
            billing_country: billing.country,
            payment_transaction_id: None,
            payment_gateway: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
        };

        let changes: Vec<StockChange> = items
            .iter()
            .map(|i| StockChange {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect();

        match self.stock_mode {
            StockMode::InTransaction => {
                let mut tx = self.pool.begin().await?;
                self.store.insert_order(&mut tx, &order).await?;
                self.store.insert_items(&mut tx, &items).await?;

                // 事务内的同步远程调用：失败时 tx 随错误返回被丢弃（回滚），
                // 成功后若提交失败则库存已扣而订单不存在——缺口保留，见模块文档
                self.catalog
                    .update_stock(&changes, StockAction::Subtract)
                    .await?;

                tx.commit().await?;
            }
            StockMode::Compensate => {
                let mut tx = self.pool.begin().await?;
                self.store.insert_order(&mut tx, &order).await?;
                self.store.insert_items(&mut tx, &items).await?;
                tx.commit().await?;

                if let Err(e) = self
                    .catalog
                    .update_stock(&changes, StockAction::Subtract)
                    .await
                {
                    // 库存未被扣减，取消订单即可，无需发布 OrderCancelled 触发返还
                    error!(order_id = %order_id, error = %e, "库存扣减失败，取消订单");
                    if let Err(cancel_err) = self
                        .store
                        .apply_transition(
                            order_id,
                            OrderStatus::Cancelled,
                            Some("库存扣减失败"),
                            None,
                            None,
                        )
                        .await
                    {
                        error!(order_id = %order_id, error = %cancel_err, "补偿取消订单失败");
                    }
                    return Err(e);
                }
            }
        }

        info!(order_id = %order_id, total = %total, items = items.len(), "订单已创建");

        // 提交后发布 OrderCreated：即发即忘，发布失败只记录日志，不影响已创建的订单
        let event = OrderCreated {
            meta: EventMeta::new(),
            order_id,
            client_id: order.client_id,
            client_email: order.client_email.clone(),
            client_name: order.client_name.clone(),
            total,
            items: items
                .iter()
                .map(|i| OrderItemInfo {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect(),
        };

        if let Err(e) = publish_json(
            self.publisher.as_ref(),
            topics::ORDER_CREATED,
            &order_id.to_string(),
            &event,
        )
        .await
        {
            warn!(order_id = %order_id, error = %e, "发布 OrderCreated 事件失败");
        }

        Ok(order)
    }
}
