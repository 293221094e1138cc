//! 消费端事件去重
//!
//! 基于 Redis `SET NX` 的一次性声明：同一消费者对同一事件 ID 只有
//! 第一次 claim 成功。用于让库存返还在事件重复投递时保持幂等。
//! `catalog.credit_dedup = false` 时使用 Noop 实现，恢复无防护行为。

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use shop_shared::cache::{Cache, CacheKey};
use shop_shared::error::Result;

/// 事件处理声明接口
///
/// `try_claim` 返回 true 表示本次是首次处理，调用方应继续执行副作用；
/// 返回 false 表示事件已被处理过，调用方应跳过。
/// 副作用失败时调用方必须 `release` 归还声明，否则该事件的重新投递
/// 会被当作重复处理跳过，副作用永远不会补上。
#[async_trait]
pub trait ProcessedEventGuard: Send + Sync {
    async fn try_claim(&self, consumer: &str, event_id: Uuid) -> Result<bool>;

    async fn release(&self, consumer: &str, event_id: Uuid) -> Result<()>;
}

/// Redis 实现，声明带 TTL 以免键无限增长
pub struct RedisEventGuard {
    cache: Cache,
    ttl: Duration,
}

impl RedisEventGuard {
    pub fn new(cache: Cache, ttl_seconds: u64) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(ttl_seconds),
        }
    }
}

#[async_trait]
impl ProcessedEventGuard for RedisEventGuard {
    async fn try_claim(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        let key = CacheKey::processed_event(consumer, &event_id.to_string());
        self.cache.set_nx(&key, &1u8, self.ttl).await
    }

    async fn release(&self, consumer: &str, event_id: Uuid) -> Result<()> {
        let key = CacheKey::processed_event(consumer, &event_id.to_string());
        self.cache.delete(&key).await
    }
}

/// 不做任何去重的实现，每次 claim 都成功
pub struct NoopEventGuard;

#[async_trait]
impl ProcessedEventGuard for NoopEventGuard {
    async fn try_claim(&self, _consumer: &str, _event_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self, _consumer: &str, _event_id: Uuid) -> Result<()> {
        Ok(())
    }
}
