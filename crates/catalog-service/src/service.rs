//! 库存服务层
//!
//! 将批量变更逐项落到存储，并为每项成功的变更发布 StockUpdated 事件。
//! 事件发布失败只记录日志，不回滚已生效的库存变更。
//! 批量请求按顺序处理，中途失败时已处理的项不回滚（与同步调用方的
//! 事务边界一致：调用方整体失败时会丢弃自己的本地事务）。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use shop_shared::error::Result;
use shop_shared::events::{EventMeta, StockUpdated};
use shop_shared::kafka::{EventPublisher, publish_json, topics};

use crate::model::{Stock, StockAction, StockUpdateItem};
use crate::store::{StockLevels, StockStore};

/// 库存服务
pub struct StockService {
    store: Arc<dyn StockStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StockService {
    pub fn new(store: Arc<dyn StockStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn get(&self, product_id: Uuid) -> Result<Option<Stock>> {
        self.store.get(product_id).await
    }

    /// 逐项应用库存变更
    pub async fn apply(&self, items: &[StockUpdateItem]) -> Result<()> {
        for item in items {
            let levels = match item.action {
                StockAction::Subtract => {
                    self.store.subtract(item.product_id, item.quantity).await?
                }
                StockAction::Add => self.store.add(item.product_id, item.quantity).await?,
            };

            info!(
                product_id = %item.product_id,
                ?item.action,
                quantity = item.quantity,
                previous = levels.previous,
                current = levels.current,
                "库存已更新"
            );

            self.publish_stock_updated(item.product_id, levels).await;
        }
        Ok(())
    }

    async fn publish_stock_updated(&self, product_id: Uuid, levels: StockLevels) {
        let event = StockUpdated {
            meta: EventMeta::new(),
            product_id,
            previous_stock: levels.previous,
            current_stock: levels.current,
            updated_at: Utc::now(),
        };

        if let Err(e) = publish_json(
            self.publisher.as_ref(),
            topics::STOCK_UPDATED,
            &product_id.to_string(),
            &event,
        )
        .await
        {
            warn!(product_id = %product_id, error = %e, "发布 StockUpdated 事件失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shop_shared::error::ShopError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 内存库存存储
    #[derive(Default)]
    struct MemoryStockStore {
        rows: Mutex<HashMap<Uuid, i32>>,
    }

    impl MemoryStockStore {
        fn with_stock(product_id: Uuid, quantity: i32) -> Self {
            let store = Self::default();
            store.rows.lock().unwrap().insert(product_id, quantity);
            store
        }

        fn quantity_of(&self, product_id: Uuid) -> Option<i32> {
            self.rows.lock().unwrap().get(&product_id).copied()
        }
    }

    #[async_trait]
    impl StockStore for MemoryStockStore {
        async fn get(&self, product_id: Uuid) -> Result<Option<Stock>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&product_id)
                .map(|&quantity| Stock {
                    product_id,
                    quantity,
                    updated_at: Utc::now(),
                }))
        }

        async fn subtract(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels> {
            let mut rows = self.rows.lock().unwrap();
            let available = rows.get(&product_id).copied().unwrap_or(0);
            if !rows.contains_key(&product_id) || available < quantity {
                return Err(ShopError::InsufficientStock {
                    product_id: product_id.to_string(),
                    requested: quantity,
                    available,
                });
            }
            rows.insert(product_id, available - quantity);
            Ok(StockLevels {
                previous: available,
                current: available - quantity,
            })
        }

        async fn add(&self, product_id: Uuid, quantity: i32) -> Result<StockLevels> {
            let mut rows = self.rows.lock().unwrap();
            let previous = rows.get(&product_id).copied().unwrap_or(0);
            rows.insert(product_id, previous + quantity);
            Ok(StockLevels {
                previous,
                current: previous + quantity,
            })
        }
    }

    /// 记录发布事件的内存发布器
    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, _key: &str, payload: Vec<u8>) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    /// 总是失败的发布器
    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> Result<()> {
            Err(ShopError::Kafka("broker 不可达".to_string()))
        }
    }

    fn subtract_item(product_id: Uuid, quantity: i32) -> StockUpdateItem {
        StockUpdateItem {
            product_id,
            quantity,
            action: StockAction::Subtract,
        }
    }

    #[tokio::test]
    async fn test_subtract_publishes_stock_updated() {
        let product_id = Uuid::now_v7();
        let store = Arc::new(MemoryStockStore::with_stock(product_id, 10));
        let publisher = Arc::new(RecordingPublisher::default());
        let service = StockService::new(store.clone(), publisher.clone());

        service.apply(&[subtract_item(product_id, 3)]).await.unwrap();

        assert_eq!(store.quantity_of(product_id), Some(7));

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::STOCK_UPDATED);
        let event: StockUpdated = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(event.previous_stock, 10);
        assert_eq!(event.current_stock, 7);
    }

    #[tokio::test]
    async fn test_insufficient_stock_propagates_without_event() {
        let product_id = Uuid::now_v7();
        let store = Arc::new(MemoryStockStore::with_stock(product_id, 2));
        let publisher = Arc::new(RecordingPublisher::default());
        let service = StockService::new(store.clone(), publisher.clone());

        let result = service.apply(&[subtract_item(product_id, 5)]).await;

        assert!(matches!(
            result,
            Err(ShopError::InsufficientStock {
                requested: 5,
                available: 2,
                ..
            })
        ));
        // 失败的变更不发布事件，库存也不变
        assert!(publisher.sent.lock().unwrap().is_empty());
        assert_eq!(store.quantity_of(product_id), Some(2));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_update() {
        let product_id = Uuid::now_v7();
        let store = Arc::new(MemoryStockStore::with_stock(product_id, 10));
        let service = StockService::new(store.clone(), Arc::new(FailingPublisher));

        service.apply(&[subtract_item(product_id, 1)]).await.unwrap();

        // 事件丢了，但库存变更已生效
        assert_eq!(store.quantity_of(product_id), Some(9));
    }

    #[tokio::test]
    async fn test_add_upserts_missing_row() {
        let product_id = Uuid::now_v7();
        let store = Arc::new(MemoryStockStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let service = StockService::new(store.clone(), publisher.clone());

        service
            .apply(&[StockUpdateItem {
                product_id,
                quantity: 4,
                action: StockAction::Add,
            }])
            .await
            .unwrap();

        assert_eq!(store.quantity_of(product_id), Some(4));
        let sent = publisher.sent.lock().unwrap();
        let event: StockUpdated = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(event.previous_stock, 0);
        assert!(event.is_back_in_stock());
    }
}
