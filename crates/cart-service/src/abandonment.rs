//! 放弃购物车扫描器
//!
//! 固定间隔扫描：最后活动早于阈值、含至少一个条目、尚未通知过的购物车
//! 发布 CartAbandoned 事件。只有发布成功才写 `abandonment_notified_at`，
//! 保证每个购物车至多通知一次；单个购物车的发布失败被捕获并记录，
//! 不中断整轮扫描，留待下一轮重试。

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use shop_shared::config::CartConfig;
use shop_shared::error::Result;
use shop_shared::events::{CartAbandoned, CartItemInfo, EventMeta};
use shop_shared::kafka::{EventPublisher, publish_json, topics};

use crate::model::Cart;
use crate::store::CartStore;

/// 放弃购物车扫描器
pub struct CartAbandonmentScheduler {
    store: Arc<dyn CartStore>,
    publisher: Arc<dyn EventPublisher>,
    threshold: Duration,
    interval: std::time::Duration,
}

impl CartAbandonmentScheduler {
    pub fn new(
        store: Arc<dyn CartStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &CartConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            threshold: Duration::hours(config.abandonment_threshold_hours),
            interval: std::time::Duration::from_secs(config.scan_interval_minutes * 60),
        }
    }

    /// 执行一轮扫描，返回成功发布的事件数量
    pub async fn scan_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.threshold;
        let candidates = self.store.find_abandoned(cutoff).await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        info!(candidates = candidates.len(), "发现放弃购物车候选");

        let mut published = 0;
        for cart in &candidates {
            // 单个购物车失败不中断整轮，未标记的购物车下一轮重试
            match self.notify_abandoned(cart).await {
                Ok(()) => published += 1,
                Err(e) => {
                    error!(cart_id = %cart.id, error = %e, "发布放弃购物车事件失败，留待下轮重试");
                }
            }
        }

        info!(published, total = candidates.len(), "放弃购物车扫描完成");
        Ok(published)
    }

    async fn notify_abandoned(&self, cart: &Cart) -> Result<()> {
        let items = self.store.find_items(cart.id).await?;
        if items.is_empty() {
            // 候选查询与条目读取之间条目可能被清空
            warn!(cart_id = %cart.id, "购物车条目已为空，跳过");
            return Ok(());
        }

        let total = items.iter().map(|i| i.line_total()).sum();
        let event = CartAbandoned {
            meta: EventMeta::new(),
            cart_id: cart.id,
            client_id: cart.client_id,
            client_email: cart.client_email.clone(),
            client_name: cart.client_name.clone(),
            total,
            item_count: items.len() as i32,
            items: items
                .iter()
                .map(|i| CartItemInfo {
                    product_id: i.product_id,
                    product_name: i.product_name.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect(),
            last_activity_at: cart.updated_at,
            abandoned_at: Utc::now(),
        };

        publish_json(
            self.publisher.as_ref(),
            topics::CART_ABANDONED,
            &cart.id.to_string(),
            &event,
        )
        .await?;

        // 发布成功才标记，失败的购物车保持候选资格
        self.store.mark_notified(cart.id, Utc::now()).await?;

        info!(cart_id = %cart.id, client_id = %cart.client_id, total = %total, "已发布放弃购物车事件");
        Ok(())
    }

    /// 按固定间隔循环扫描，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "放弃购物车扫描器已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，放弃购物车扫描器退出");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "放弃购物车扫描失败");
                    }
                }
            }
        }
    }
}
