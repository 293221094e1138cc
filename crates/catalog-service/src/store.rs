//! 库存存储
//!
//! 扣减与返还都在事务内用行锁串行化同一商品的并发变更。
//! Subtract 在行缺失或余量不足时拒绝；Add 对缺失行执行插入（upsert 语义）。

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use shop_shared::error::{Result, ShopError};

use crate::model::Stock;

/// 单次变更前后的库存量，用于构造 StockUpdated 事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevels {
    pub previous: i32,
    pub current: i32,
}

/// 库存存储抽象，消费者与服务层在测试中用内存实现替换
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get(&self, product_id: Uuid) -> Result<Option<Stock>>;

    /// 扣减库存，余量不足或行缺失时返回 InsufficientStock
    async fn subtract(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels>;

    /// 增加库存，行缺失时插入新行
    async fn add(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels>;
}

/// PostgreSQL 库存存储
#[derive(Clone)]
pub struct PgStockStore {
    pool: PgPool,
}

impl PgStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn get(&self, product_id: Uuid) -> Result<Option<Stock>> {
        let stock = sqlx::query_as::<_, Stock>(
            "SELECT product_id, quantity, updated_at FROM stocks WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stock)
    }

    async fn subtract(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, i32>(
            "SELECT quantity FROM stocks WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(available) = current else {
            return Err(ShopError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available: 0,
            });
        };

        if available < quantity {
            return Err(ShopError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available,
            });
        }

        let new_quantity = available - quantity;
        sqlx::query("UPDATE stocks SET quantity = $2, updated_at = $3 WHERE product_id = $1")
            .bind(product_id)
            .bind(new_quantity)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(StockLevels {
            previous: available,
            current: new_quantity,
        })
    }

    async fn add(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, i32>(
            "SELECT quantity FROM stocks WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let levels = match current {
            Some(available) => {
                let new_quantity = available + quantity;
                sqlx::query(
                    "UPDATE stocks SET quantity = $2, updated_at = $3 WHERE product_id = $1",
                )
                .bind(product_id)
                .bind(new_quantity)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;

                StockLevels {
                    previous: available,
                    current: new_quantity,
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO stocks (product_id, quantity, updated_at) VALUES ($1, $2, $3)",
                )
                .bind(product_id)
                .bind(quantity)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;

                StockLevels {
                    previous: 0,
                    current: quantity,
                }
            }
        };

        tx.commit().await?;
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_shared::config::DatabaseConfig;
    use shop_shared::database::Database;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_subtract_missing_row_is_insufficient() {
        let config = DatabaseConfig::default();
        let db = Database::connect(&config).await.unwrap();
        let store = PgStockStore::new(db.pool().clone());

        let result = store.subtract(Uuid::now_v7(), 1).await;
        assert!(matches!(
            result,
            Err(ShopError::InsufficientStock { available: 0, .. })
        ));
    }
}
