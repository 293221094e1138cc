//! 订单存储
//!
//! 基于 sqlx 运行时查询的 PostgreSQL 仓储。状态流转在事务内
//! 使用行锁（SELECT ... FOR UPDATE）串行化同一订单的并发写入，
//! 不使用乐观并发令牌。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use shop_shared::error::{Result, ShopError};

use crate::model::{Order, OrderItem};
use crate::state_machine::{OrderStatus, can_transition};

const ORDER_COLUMNS: &str = "id, client_id, client_email, client_name, status, payment_type, \
     total, shipping_street, shipping_city, shipping_state, shipping_zip_code, shipping_country, \
     billing_street, billing_city, billing_state, billing_zip_code, billing_country, \
     payment_transaction_id, payment_gateway, cancellation_reason, \
     created_at, updated_at, paid_at, shipped_at, delivered_at, cancelled_at";

/// 支付结果消费者对订单状态的最小写入面
///
/// 拆出独立 trait 使消费者可以在单元测试中用内存实现替换存储。
/// mark_paid / mark_payment_failed 是无条件覆盖——是否经过状态机校验
/// 由调用方（消费者）决定。
#[async_trait]
pub trait OrderStatusStore: Send + Sync {
    async fn current_status(&self, order_id: Uuid) -> Result<Option<OrderStatus>>;

    async fn mark_paid(
        &self,
        order_id: Uuid,
        transaction_id: Option<&str>,
        gateway: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_payment_failed(&self, order_id: Uuid, failed_at: DateTime<Utc>) -> Result<()>;
}

/// 状态流转结果
///
/// `changed` 为 false 表示请求状态与当前状态相同，属幂等空操作，
/// 没有任何写入发生。调用方据此决定是否发布副作用事件——
/// 对空操作重复发布 OrderCancelled 会触发重复库存返还。
#[derive(Debug)]
pub struct TransitionOutcome {
    pub order: Order,
    pub changed: bool,
}

/// PostgreSQL 订单仓储
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按 ID 查找订单，不存在时返回 NotFound
    pub async fn find(&self, order_id: Uuid) -> Result<Order> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ShopError::not_found("Order", order_id))
    }

    /// 查找订单行快照
    pub async fn find_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity, unit_price, line_total \
             FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// 在给定事务内插入订单头
    pub async fn insert_order(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, client_id, client_email, client_name, status, payment_type, \
             total, shipping_street, shipping_city, shipping_state, shipping_zip_code, shipping_country, \
             billing_street, billing_city, billing_state, billing_zip_code, billing_country, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(order.id)
        .bind(order.client_id)
        .bind(&order.client_email)
        .bind(&order.client_name)
        .bind(order.status)
        .bind(order.payment_type)
        .bind(order.total)
        .bind(&order.shipping_street)
        .bind(&order.shipping_city)
        .bind(&order.shipping_state)
        .bind(&order.shipping_zip_code)
        .bind(&order.shipping_country)
        .bind(&order.billing_street)
        .bind(&order.billing_city)
        .bind(&order.billing_state)
        .bind(&order.billing_zip_code)
        .bind(&order.billing_country)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 在给定事务内插入订单行快照
    pub async fn insert_items(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        items: &[OrderItem],
    ) -> Result<()> {
        for item in items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price, line_total) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 开启事务（供订单创建编排器组合使用）
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// 经状态机校验的状态流转，副作用时间戳与状态写入同一事务
    ///
    /// - 状态未变化时为幂等空操作，结果的 `changed` 为 false
    /// - 流转表拒绝时返回 InvalidStateTransition
    /// - Paid 附带交易号与网关；Cancelled 附带取消原因
    ///
    /// 取消生效后的 OrderCancelled 事件由调用方在提交后发布。
    #[instrument(skip(self, transaction_id, gateway))]
    pub async fn apply_transition(
        &self,
        order_id: Uuid,
        requested: OrderStatus,
        reason: Option<&str>,
        transaction_id: Option<&str>,
        gateway: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ShopError::not_found("Order", order_id))?;

        // 状态未变化：幂等空操作
        if order.status == requested {
            tx.commit().await?;
            return Ok(TransitionOutcome {
                order,
                changed: false,
            });
        }

        if !can_transition(order.status, requested) {
            return Err(ShopError::InvalidStateTransition {
                current: order.status.to_string(),
                requested: requested.to_string(),
            });
        }

        let now = Utc::now();
        match requested {
            OrderStatus::Paid => {
                sqlx::query(
                    "UPDATE orders SET status = $2, paid_at = $3, \
                     payment_transaction_id = $4, payment_gateway = $5, updated_at = $3 \
                     WHERE id = $1",
                )
                .bind(order_id)
                .bind(requested)
                .bind(now)
                .bind(transaction_id)
                .bind(gateway)
                .execute(&mut *tx)
                .await?;
            }
            OrderStatus::Shipped => {
                sqlx::query(
                    "UPDATE orders SET status = $2, shipped_at = $3, updated_at = $3 WHERE id = $1",
                )
                .bind(order_id)
                .bind(requested)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            OrderStatus::Delivered => {
                sqlx::query(
                    "UPDATE orders SET status = $2, delivered_at = $3, updated_at = $3 WHERE id = $1",
                )
                .bind(order_id)
                .bind(requested)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            OrderStatus::Cancelled => {
                sqlx::query(
                    "UPDATE orders SET status = $2, cancelled_at = $3, \
                     cancellation_reason = $4, updated_at = $3 WHERE id = $1",
                )
                .bind(order_id)
                .bind(requested)
                .bind(now)
                .bind(reason)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
                    .bind(order_id)
                    .bind(requested)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        let order = self.find(order_id).await?;
        Ok(TransitionOutcome {
            order,
            changed: true,
        })
    }
}

#[async_trait]
impl OrderStatusStore for PgOrderStore {
    async fn current_status(&self, order_id: Uuid) -> Result<Option<OrderStatus>> {
        let status = sqlx::query_scalar::<_, OrderStatus>(
            "SELECT status FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    async fn mark_paid(
        &self,
        order_id: Uuid,
        transaction_id: Option<&str>,
        gateway: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET status = $2, paid_at = $3, \
             payment_transaction_id = $4, payment_gateway = $5, updated_at = $3 WHERE id = $1",
        )
        .bind(order_id)
        .bind(OrderStatus::Paid)
        .bind(paid_at)
        .bind(transaction_id)
        .bind(gateway)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_payment_failed(&self, order_id: Uuid, failed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id)
            .bind(OrderStatus::PaymentFailed)
            .bind(failed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_shared::config::DatabaseConfig;
    use shop_shared::database::Database;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_apply_transition_round_trip() {
        let config = DatabaseConfig::default();
        let db = Database::connect(&config).await.unwrap();
        let store = PgOrderStore::new(db.pool().clone());

        let missing = store.find(Uuid::now_v7()).await;
        assert!(matches!(missing, Err(ShopError::NotFound { .. })));
    }
}
