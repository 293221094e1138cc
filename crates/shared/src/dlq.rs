//! 死信队列处理
//!
//! 当事件处理失败且重试耗尽后，消息会被发送到死信队列（DLQ）。
//! DLQ 消费者在冷却时间过后将消息重新投递回原始 topic，
//! 超过重投上限后记录日志等待人工介入。
//! 这一机制确保消息不会因瞬时故障而永久丢失。
//!
//! 消费组开启自动提交，处理过的 DLQ 消息位点不会回退，因此：
//! - 重投时间未到的消息必须重新入队（发回 DLQ topic 尾部），
//!   直接跳过会随位点提交被永久丢弃；
//! - 重投次数通过消息头跟随重投消息走完整个
//!   DLQ → 原始 topic → DLQ 循环，再次失败时信封从头部计数恢复，
//!   重投上限才能真正生效。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::ShopError;
use crate::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use crate::retry::RetryPolicy;

/// 重投消息上携带已重投次数的消息头
///
/// DLQ 消费者重投时写入，业务消费者再次失败时由 DlqProducer 读回，
/// 使计数跨越重投循环累积。
pub const DLQ_REDELIVERY_HEADER: &str = "x-dlq-redelivery";

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、重投次数等元数据，
/// 便于在死信队列消费时决定是否重投或永久归档。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息 ID（如 event_id）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（JSON 序列化的字符串）
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 已重投次数
    pub retry_count: u32,
    /// 最大重投次数
    pub max_retries: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 下次重投时间（None 表示不再重投）
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 创建新的死信消息
    ///
    /// 首次进入 DLQ 时 retry_count 为 0，next_retry_at 设置为
    /// 当前时间加冷却时长，避免立即重投再次撞上同一故障。
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        max_retries: u32,
        cooldown: chrono::Duration,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count: 0,
            max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: Some(now + cooldown),
            source_service: source_service.into(),
        }
    }

    /// 是否应继续重投
    ///
    /// 只要已重投次数尚未达到上限，就允许继续尝试
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 从已发生的重投次数恢复信封计数
    ///
    /// 重投回原始 topic 的消息带有 [`DLQ_REDELIVERY_HEADER`] 头；
    /// 该消息再次处理失败时，新信封从头部计数恢复而不是从 0 开始。
    /// 下次重投时间按退避策略随次数递增；已达上限则置 None，不再重投。
    pub fn resume_redelivery(&mut self, redeliveries: u32, retry_policy: &RetryPolicy) {
        if redeliveries == 0 {
            return;
        }
        self.retry_count = redeliveries;

        if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(self.retry_count);
            self.next_retry_at =
                Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            // 已耗尽重投机会，不再安排重投
            self.next_retry_at = None;
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
///
/// 各服务在事件处理重试耗尽后调用此组件将失败消息写入死信队列，
/// 而非直接丢弃。保证消息最终会被重投或人工处理。
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    max_redeliveries: u32,
    cooldown: chrono::Duration,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    /// 从应用配置构造，冷却时长与重投上限来自 kafka 配置段
    pub fn new(producer: KafkaProducer, source_service: &str, config: &AppConfig) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            max_redeliveries: config.kafka.dlq_max_redeliveries,
            cooldown: chrono::Duration::minutes(
                config.kafka.dlq_redelivery_cooldown_minutes as i64,
            ),
            retry_policy: RetryPolicy::from_kafka(&config.kafka),
        }
    }

    /// 将处理失败的消息发送到死信队列
    ///
    /// 消息 ID 取 Kafka key，缺失时记为 "unknown"；若消息带有重投次数头，
    /// 信封计数从该值恢复，保证跨重投循环累积。
    pub async fn send_to_dlq(&self, msg: &ConsumerMessage, error: &str) -> Result<(), ShopError> {
        let dlq_msg = build_dead_letter(
            msg,
            error,
            &self.source_service,
            self.max_redeliveries,
            self.cooldown,
            &self.retry_policy,
        );

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, &dlq_msg.message_id, &dlq_msg)
            .await?;

        warn!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            retry_count = dlq_msg.retry_count,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

/// 由失败消息构造死信信封，重投次数从消息头恢复
fn build_dead_letter(
    msg: &ConsumerMessage,
    error: &str,
    source_service: &str,
    max_redeliveries: u32,
    cooldown: chrono::Duration,
    retry_policy: &RetryPolicy,
) -> DeadLetterMessage {
    let message_id = msg.key.clone().unwrap_or_else(|| "unknown".to_string());
    let payload = msg.payload_str().unwrap_or("<非 UTF-8 负载>");

    let mut envelope = DeadLetterMessage::new(
        message_id,
        &msg.topic,
        payload,
        error,
        max_redeliveries,
        cooldown,
        source_service,
    );

    let redeliveries = msg
        .headers
        .get(DLQ_REDELIVERY_HEADER)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    envelope.resume_redelivery(redeliveries, retry_policy);

    envelope
}

// ---------------------------------------------------------------------------
// DlqConsumer — 处理死信队列消息
// ---------------------------------------------------------------------------

/// DLQ 消费者
///
/// 持续消费死信队列，对尚有重投机会且已到达重投时间的消息重新投递到原始 topic，
/// 重投时间未到的消息重新入队等待。超过重投上限的消息记录日志以便人工介入。
/// 仅在 `kafka.dlq_redelivery_enabled` 为 true 时由服务入口创建。
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    /// 将待重投的消息发回原始 topic
    retry_producer: KafkaProducer,
    /// 重新入队前的等待时间，避免未到期消息在队列里空转
    requeue_delay: std::time::Duration,
}

impl DlqConsumer {
    /// 创建 DLQ 消费者
    ///
    /// 使用 `.dlq` 后缀作为独立消费组，与业务消费者互不干扰
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, ShopError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?;
        consumer.subscribe(&[topics::DEAD_LETTER_QUEUE])?;

        info!(
            "DLQ 消费者已创建，订阅 topic: {}",
            topics::DEAD_LETTER_QUEUE
        );

        Ok(Self {
            consumer,
            retry_producer,
            requeue_delay: std::time::Duration::from_secs(config.kafka.retry_delay_seconds),
        })
    }

    /// 启动 DLQ 消费循环
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let retry_producer = self.retry_producer.clone();
        let requeue_delay = self.requeue_delay;

        self.consumer
            .start(shutdown, move |msg| {
                let producer = retry_producer.clone();
                async move { handle_dlq_message(&msg, &producer, requeue_delay).await }
            })
            .await;

        info!("DLQ 消费循环已退出");
    }
}

/// 单条死信消息的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DlqDisposition {
    /// 重投时间已到，发回原始 topic
    Redeliver,
    /// 重投时间未到，重新入队等待下次检查
    Requeue,
    /// 已耗尽重投次数，等待人工介入
    Park,
}

/// 判定死信消息的处置方式
///
/// 消费组自动提交位点，未到期的消息不能返回后跳过（会被永久丢弃），
/// 只能重新入队。
fn disposition_for(dlq_msg: &DeadLetterMessage, now: DateTime<Utc>) -> DlqDisposition {
    if !dlq_msg.should_retry() {
        return DlqDisposition::Park;
    }

    match dlq_msg.next_retry_at {
        Some(next_retry) if now < next_retry => DlqDisposition::Requeue,
        _ => DlqDisposition::Redeliver,
    }
}

/// 处理单条死信消息
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
    requeue_delay: std::time::Duration,
) -> Result<(), ShopError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    match disposition_for(&dlq_msg, Utc::now()) {
        DlqDisposition::Redeliver => {
            info!(
                message_id = %dlq_msg.message_id,
                source_topic = %dlq_msg.source_topic,
                retry_count = dlq_msg.retry_count,
                max_retries = dlq_msg.max_retries,
                "重投死信消息，发回原始 topic"
            );

            // 重投次数头随消息走：再次失败时 DlqProducer 从这里恢复计数
            retry_producer
                .send_with_headers(
                    &dlq_msg.source_topic,
                    &dlq_msg.message_id,
                    dlq_msg.payload.as_bytes(),
                    &[(
                        DLQ_REDELIVERY_HEADER,
                        (dlq_msg.retry_count + 1).to_string(),
                    )],
                )
                .await?;
        }
        DlqDisposition::Requeue => {
            info!(
                message_id = %dlq_msg.message_id,
                next_retry_at = ?dlq_msg.next_retry_at,
                "死信消息重投时间未到，重新入队等待"
            );

            // 小睡后再入队，限制未到期消息在 DLQ 里的循环频率
            tokio::time::sleep(requeue_delay).await;
            retry_producer
                .send_json(topics::DEAD_LETTER_QUEUE, &dlq_msg.message_id, &dlq_msg)
                .await?;
        }
        DlqDisposition::Park => {
            error!(
                message_id = %dlq_msg.message_id,
                source_topic = %dlq_msg.source_topic,
                source_service = %dlq_msg.source_service,
                retry_count = dlq_msg.retry_count,
                max_retries = dlq_msg.max_retries,
                first_failed_at = %dlq_msg.first_failed_at,
                last_failed_at = %dlq_msg.last_failed_at,
                error = %dlq_msg.error,
                "死信消息已耗尽重投次数，需人工介入"
            );
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::collections::HashMap;
    use std::time::Duration;

    fn make_message(max_retries: u32) -> DeadLetterMessage {
        DeadLetterMessage::new(
            "evt-001",
            topics::ORDER_CANCELLED,
            r#"{"eventId":"evt-001"}"#,
            "处理超时",
            max_retries,
            chrono::Duration::minutes(60),
            "catalog-service",
        )
    }

    fn short_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    fn consumer_message(
        topic: &str,
        key: Option<&str>,
        payload: &str,
        headers: HashMap<String, String>,
    ) -> ConsumerMessage {
        ConsumerMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: 7,
            key: key.map(String::from),
            payload: payload.as_bytes().to_vec(),
            timestamp: None,
            headers,
        }
    }

    #[test]
    fn test_dead_letter_message_creation() {
        let msg = make_message(3);

        assert_eq!(msg.message_id, "evt-001");
        assert_eq!(msg.source_topic, topics::ORDER_CANCELLED);
        assert_eq!(msg.error, "处理超时");
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.max_retries, 3);
        assert_eq!(msg.source_service, "catalog-service");
        // 首次失败和最近失败时间应相同
        assert_eq!(msg.first_failed_at, msg.last_failed_at);
        // 首次重投安排在冷却时间之后，而非立即
        let next = msg.next_retry_at.unwrap();
        assert!(next > msg.first_failed_at + chrono::Duration::minutes(59));
    }

    #[test]
    fn test_should_retry_bounds() {
        let msg = make_message(3);
        assert!(msg.should_retry());

        let mut at_limit = make_message(2);
        at_limit.retry_count = 2;
        assert!(!at_limit.should_retry());

        at_limit.retry_count = 3;
        assert!(!at_limit.should_retry());
    }

    #[test]
    fn test_resume_redelivery_carries_count() {
        let policy = short_policy();

        // 第一次重投后的失败：计数恢复为 1，仍安排下次重投
        let mut msg = make_message(3);
        let original_first_failed = msg.first_failed_at;
        msg.resume_redelivery(1, &policy);
        assert_eq!(msg.retry_count, 1);
        assert!(msg.next_retry_at.is_some());
        // first_failed_at 不应改变
        assert_eq!(msg.first_failed_at, original_first_failed);

        // 退避随次数递增
        let mut second = make_message(3);
        second.resume_redelivery(2, &policy);
        assert!(second.next_retry_at.unwrap() > msg.next_retry_at.unwrap());

        // 无重投头（首次失败）：保持冷却时长安排
        let mut fresh = make_message(3);
        let scheduled = fresh.next_retry_at;
        fresh.resume_redelivery(0, &policy);
        assert_eq!(fresh.retry_count, 0);
        assert_eq!(fresh.next_retry_at, scheduled);
    }

    #[test]
    fn test_resume_redelivery_at_limit_stops_retrying() {
        let mut msg = make_message(3);
        msg.resume_redelivery(3, &short_policy());

        assert_eq!(msg.retry_count, 3);
        // 达到上限后不再安排重投
        assert!(msg.next_retry_at.is_none());
        assert!(!msg.should_retry());
    }

    /// 重投上限跨重投循环生效：计数从消息头恢复而不是从 0 开始
    #[test]
    fn test_dead_letter_resumes_count_from_header() {
        let policy = short_policy();

        let headers = HashMap::from([(DLQ_REDELIVERY_HEADER.to_string(), "2".to_string())]);
        let msg = consumer_message(
            topics::ORDER_CANCELLED,
            Some("evt-002"),
            r#"{"eventId":"evt-002"}"#,
            headers,
        );

        let envelope = build_dead_letter(
            &msg,
            "处理超时",
            "catalog-service",
            3,
            chrono::Duration::minutes(60),
            &policy,
        );
        assert_eq!(envelope.message_id, "evt-002");
        assert_eq!(envelope.retry_count, 2);
        assert!(envelope.should_retry());

        // 第 3 次失败达到上限，不再安排重投
        let exhausted_headers =
            HashMap::from([(DLQ_REDELIVERY_HEADER.to_string(), "3".to_string())]);
        let exhausted_msg = consumer_message(
            topics::ORDER_CANCELLED,
            Some("evt-002"),
            r#"{"eventId":"evt-002"}"#,
            exhausted_headers,
        );
        let exhausted = build_dead_letter(
            &exhausted_msg,
            "处理超时",
            "catalog-service",
            3,
            chrono::Duration::minutes(60),
            &policy,
        );
        assert_eq!(exhausted.retry_count, 3);
        assert!(!exhausted.should_retry());
        assert!(exhausted.next_retry_at.is_none());
    }

    #[test]
    fn test_dead_letter_without_header_starts_fresh() {
        let msg = consumer_message(
            topics::ORDER_CANCELLED,
            None,
            r#"{"eventId":"evt-003"}"#,
            HashMap::new(),
        );

        let envelope = build_dead_letter(
            &msg,
            "broker 不可达",
            "order-service",
            3,
            chrono::Duration::minutes(60),
            &short_policy(),
        );
        assert_eq!(envelope.message_id, "unknown");
        assert_eq!(envelope.retry_count, 0);
        assert!(envelope.next_retry_at.is_some());
    }

    #[test]
    fn test_disposition_redelivers_when_due() {
        let mut msg = make_message(3);
        msg.next_retry_at = Some(Utc::now() - chrono::Duration::minutes(1));

        assert_eq!(
            disposition_for(&msg, Utc::now()),
            DlqDisposition::Redeliver
        );
    }

    /// 未到期的消息必须重新入队而不是跳过：位点自动提交，跳过即丢弃
    #[test]
    fn test_disposition_requeues_before_due_time() {
        let msg = make_message(3);

        assert_eq!(disposition_for(&msg, Utc::now()), DlqDisposition::Requeue);
    }

    #[test]
    fn test_disposition_parks_exhausted_message() {
        let mut msg = make_message(3);
        msg.retry_count = 3;
        msg.next_retry_at = None;

        assert_eq!(disposition_for(&msg, Utc::now()), DlqDisposition::Park);
    }

    #[test]
    fn test_dead_letter_serialization() {
        let msg = make_message(3);

        let json = serde_json::to_string(&msg).unwrap();

        // 验证 camelCase 序列化
        assert!(json.contains("messageId"));
        assert!(json.contains("sourceTopic"));
        assert!(json.contains("retryCount"));
        assert!(json.contains("maxRetries"));
        assert!(json.contains("firstFailedAt"));
        assert!(json.contains("lastFailedAt"));
        assert!(json.contains("nextRetryAt"));
        assert!(json.contains("sourceService"));

        // 验证能反序列化回来
        let deserialized: DeadLetterMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.message_id, "evt-001");
        assert_eq!(deserialized.source_topic, topics::ORDER_CANCELLED);
        assert_eq!(deserialized.retry_count, 0);
    }
}
