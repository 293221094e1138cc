//! 购物车存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use shop_shared::error::Result;

use crate::model::{Cart, CartItem};

const CART_COLUMNS: &str = "c.id, c.client_id, cl.email AS client_email, cl.name AS client_name, \
     c.created_at, c.updated_at, c.abandonment_notified_at";

/// 购物车存储抽象
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_by_client(&self, client_id: Uuid) -> Result<Option<Cart>>;

    async fn find_items(&self, cart_id: Uuid) -> Result<Vec<CartItem>>;

    /// 删除整个聚合（条目与头）
    async fn delete_cart(&self, cart_id: Uuid) -> Result<()>;

    /// 查找放弃候选：最后活动早于 cutoff、至少一个条目、
    /// 尚未通知过、且归属于已注册客户
    async fn find_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<Cart>>;

    async fn mark_notified(&self, cart_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// PostgreSQL 购物车存储
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn find_by_client(&self, client_id: Uuid) -> Result<Option<Cart>> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts c \
             JOIN clients cl ON cl.id = c.client_id \
             WHERE c.client_id = $1"
        );
        let cart = sqlx::query_as::<_, Cart>(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cart)
    }

    async fn find_items(&self, cart_id: Uuid) -> Result<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(
            "SELECT id, cart_id, product_id, product_name, quantity, unit_price \
             FROM cart_items WHERE cart_id = $1 ORDER BY id",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn delete_cart(&self, cart_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<Cart>> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts c \
             JOIN clients cl ON cl.id = c.client_id \
             WHERE c.updated_at < $1 \
               AND c.abandonment_notified_at IS NULL \
               AND EXISTS (SELECT 1 FROM cart_items ci WHERE ci.cart_id = c.id) \
             ORDER BY c.updated_at"
        );
        let carts = sqlx::query_as::<_, Cart>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(carts)
    }

    async fn mark_notified(&self, cart_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE carts SET abandonment_notified_at = $2 WHERE id = $1")
            .bind(cart_id)
            .bind(at)
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
    async fn test_find_by_client_missing() {
        let config = DatabaseConfig::default();
        let db = Database::connect(&config).await.unwrap();
        let store = PgCartStore::new(db.pool().clone());

        let cart = store.find_by_client(Uuid::now_v7()).await.unwrap();
        assert!(cart.is_none());
    }
}
