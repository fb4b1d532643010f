//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer/Admin 抽象，
//! 统一消息序列化、错误映射、手动提交和优雅关闭语义。
//!
//! 确认语义映射：
//! - Ack：提交 `offset + 1`
//! - Requeue：带递增的 `x-redelivery-count` 头重新发布到同一 topic 尾部，再提交原 offset；
//!   重新发布失败时回退到该 offset 重新拉取，回退也失败则停止消费循环

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::DispatchError;
use crate::retry::{RetryPolicy, retry_with_policy};

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理所有 Kafka topic 名称
pub mod topics {
    pub const ORDERS: &str = "orders";
    pub const USERS: &str = "users";
    pub const INVENTORY: &str = "inventory";
    pub const DEAD_LETTER_QUEUE: &str = "notifications.dlq";
}

/// 重新入队次数
pub const REDELIVERY_COUNT_HEADER: &str = "x-redelivery-count";

/// 首次处理失败的时间（RFC 3339），首次重新入队时写入
pub const FIRST_FAILED_AT_HEADER: &str = "x-first-failed-at";

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 已被重新入队的次数，缺失或无法解析时视为 0
    pub fn redelivery_count(&self) -> u32 {
        self.headers
            .get(REDELIVERY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// 消息标识：优先使用 key，否则由 topic/partition/offset 拼成
    pub fn message_id(&self) -> String {
        match &self.key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => format!("{}-{}-{}", self.topic, self.partition, self.offset),
        }
    }

    /// 构造重新入队用的消息头：计数加一，保留首次失败时间
    pub fn requeue_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(k, _)| k.as_str() != REDELIVERY_COUNT_HEADER)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        headers.push((
            REDELIVERY_COUNT_HEADER.to_string(),
            (self.redelivery_count() + 1).to_string(),
        ));
        if !self.headers.contains_key(FIRST_FAILED_AT_HEADER) {
            headers.push((FIRST_FAILED_AT_HEADER.to_string(), Utc::now().to_rfc3339()));
        }
        headers
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer`（内部为 Arc），可廉价 Clone。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `acks=all` 保证消息写入所有同步副本后才确认，对应持久化发布。
    pub fn new(config: &KafkaConfig) -> Result<Self, DispatchError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| DispatchError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), DispatchError> {
        self.send_with_headers(topic, key, payload, &[]).await
    }

    /// 发送带消息头的原始字节消息
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<(i32, i64), DispatchError> {
        let mut owned = OwnedHeaders::new();
        for (k, v) in headers {
            owned = owned.insert(Header {
                key: k.as_str(),
                value: Some(v.as_bytes()),
            });
        }

        let mut record: FutureRecord<'_, str, [u8]> =
            FutureRecord::to(topic).payload(payload).headers(owned);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| DispatchError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &T,
    ) -> Result<(i32, i64), DispatchError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| DispatchError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// TopicAdmin
// ---------------------------------------------------------------------------

/// Topic 声明
///
/// Kafka topic 天然持久化；声明是幂等的，已存在视为成功。
#[derive(Clone)]
pub struct TopicAdmin {
    admin: std::sync::Arc<AdminClient<DefaultClientContext>>,
    partitions: i32,
    replication: i32,
}

impl TopicAdmin {
    pub fn new(config: &KafkaConfig) -> Result<Self, DispatchError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .create()
            .map_err(|e| DispatchError::Kafka(format!("创建 AdminClient 失败: {e}")))?;

        Ok(Self {
            admin: std::sync::Arc::new(admin),
            partitions: config.topic_partitions,
            replication: config.topic_replication,
        })
    }

    /// 声明 topic，已存在时直接返回成功
    pub async fn declare(&self, topic: &str) -> Result<(), DispatchError> {
        let new_topic = NewTopic::new(
            topic,
            self.partitions,
            TopicReplication::Fixed(self.replication),
        );
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        let results = self
            .admin
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| DispatchError::Kafka(format!("声明 topic 失败: {e}")))?;

        for result in results {
            match result {
                Ok(name) => info!(topic = %name, "topic 已创建"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %name, "topic 已存在");
                }
                Err((name, code)) => {
                    return Err(DispatchError::Kafka(format!(
                        "声明 topic {name} 失败: {code}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 消息处理完成后的确认方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// 提交 offset，消息不再投递
    Ack,
    /// 重新发布到 topic 尾部后提交 offset
    Requeue,
}

/// 重新发布使用的短退避，避免 Broker 抖动时丢失重新入队
fn republish_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        multiplier: 2.0,
    }
}

/// 面向业务的 Kafka 消费者
///
/// 关闭自动提交，由 handler 的返回值决定提交或重新入队，
/// 实现至少一次投递；基于 `watch` channel 优雅关闭。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 让每个 topic 使用独立的消费组，如 "notification-service.orders"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, DispatchError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| DispatchError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), DispatchError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| DispatchError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// - 收到消息时调用 handler，并按返回的 `Acknowledgement` 提交或重新入队。
    /// - 关闭信号变为 `true` 时退出循环；正在执行的 handler 会先完成。
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        producer: KafkaProducer,
        handler: F,
    ) where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Acknowledgement>,
    {
        use futures::StreamExt;

        let broker = KafkaSettlement {
            consumer: &self.consumer,
            producer: &producer,
        };
        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            drop(borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                redelivery_count = msg.redelivery_count(),
                                "收到 Kafka 消息"
                            );

                            let ack = handler(msg.clone()).await;
                            if let Err(e) = settle(&broker, &msg, ack).await {
                                error!(
                                    topic = %msg.topic,
                                    partition = msg.partition,
                                    offset = msg.offset,
                                    error = %e,
                                    "消息无法安全结算，消费循环停止"
                                );
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 结算
// ---------------------------------------------------------------------------

/// 结算消息所需的 Broker 操作
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Settlement: Send + Sync {
    /// 以给定消息头将消息重新发布到原 topic 尾部
    async fn republish(
        &self,
        msg: &ConsumerMessage,
        headers: Vec<(String, String)>,
    ) -> Result<(), DispatchError>;

    /// 提交消费位置，下次从 `next_offset` 开始
    fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), DispatchError>;

    /// 将消费位置回退到 `offset`，使其被重新拉取
    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), DispatchError>;
}

/// 按确认方式结算一条消息
///
/// 重新发布失败时不提交，并回退到该消息的 offset；否则后续消息的提交会越过它。
/// 返回 `Err` 表示回退也失败，调用方必须停止消费，未提交的 offset 在重启后重新投递。
pub async fn settle<S>(
    broker: &S,
    msg: &ConsumerMessage,
    ack: Acknowledgement,
) -> Result<(), DispatchError>
where
    S: Settlement + ?Sized,
{
    if ack == Acknowledgement::Requeue {
        if let Err(e) = broker.republish(msg, msg.requeue_headers()).await {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "重新入队失败，回退 offset 等待重新拉取"
            );
            return broker
                .rewind(&msg.topic, msg.partition, msg.offset)
                .map_err(|rewind_err| {
                    DispatchError::Kafka(format!("重新入队失败 ({e})，回退 offset 失败: {rewind_err}"))
                });
        }
        debug!(
            topic = %msg.topic,
            offset = msg.offset,
            redelivery_count = msg.redelivery_count() + 1,
            "消息已重新入队"
        );
    }

    // 提交失败时后续提交会覆盖该位置，只记录日志
    if let Err(e) = broker.commit(&msg.topic, msg.partition, msg.offset + 1) {
        error!(topic = %msg.topic, offset = msg.offset, error = %e, "提交 offset 失败");
    }
    Ok(())
}

/// 基于 rdkafka 消费者与生产者的结算实现
struct KafkaSettlement<'a> {
    consumer: &'a StreamConsumer,
    producer: &'a KafkaProducer,
}

#[async_trait]
impl<'a> Settlement for KafkaSettlement<'a> {
    async fn republish(
        &self,
        msg: &ConsumerMessage,
        headers: Vec<(String, String)>,
    ) -> Result<(), DispatchError> {
        retry_with_policy(
            &republish_policy(),
            "requeue",
            DispatchError::is_retryable,
            || {
                self.producer
                    .send_with_headers(&msg.topic, msg.key.as_deref(), &msg.payload, &headers)
            },
        )
        .await
        .map(|_| ())
    }

    fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), DispatchError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(|e| DispatchError::Kafka(format!("构造提交列表失败: {e}")))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| DispatchError::Kafka(format!("提交 offset 失败: {e}")))
    }

    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), DispatchError> {
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| DispatchError::Kafka(format!("回退 offset 失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message(headers: HashMap<String, String>) -> ConsumerMessage {
        ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 42,
            key: None,
            payload: br#"{"event_type":"order_created"}"#.to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers,
        }
    }

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::ORDERS, "orders");
        assert_eq!(topics::USERS, "users");
        assert_eq!(topics::INVENTORY, "inventory");
        assert_eq!(topics::DEAD_LETTER_QUEUE, "notifications.dlq");
    }

    #[test]
    fn test_redelivery_count_defaults_to_zero() {
        assert_eq!(message(HashMap::new()).redelivery_count(), 0);

        let garbled = HashMap::from([(REDELIVERY_COUNT_HEADER.to_string(), "abc".to_string())]);
        assert_eq!(message(garbled).redelivery_count(), 0);
    }

    #[test]
    fn test_requeue_headers_increment_count() {
        let headers = HashMap::from([
            (REDELIVERY_COUNT_HEADER.to_string(), "2".to_string()),
            ("trace-id".to_string(), "abc-123".to_string()),
        ]);
        let msg = message(headers);

        let requeued: HashMap<String, String> = msg.requeue_headers().into_iter().collect();
        assert_eq!(requeued.get(REDELIVERY_COUNT_HEADER).unwrap(), "3");
        assert_eq!(requeued.get("trace-id").unwrap(), "abc-123");
        assert!(requeued.contains_key(FIRST_FAILED_AT_HEADER));
    }

    #[test]
    fn test_requeue_headers_keep_first_failed_at() {
        let headers = HashMap::from([(
            FIRST_FAILED_AT_HEADER.to_string(),
            "2026-01-01T00:00:00+00:00".to_string(),
        )]);
        let requeued: HashMap<String, String> =
            message(headers).requeue_headers().into_iter().collect();
        assert_eq!(
            requeued.get(FIRST_FAILED_AT_HEADER).unwrap(),
            "2026-01-01T00:00:00+00:00"
        );
        assert_eq!(requeued.get(REDELIVERY_COUNT_HEADER).unwrap(), "1");
    }

    fn kafka_down() -> DispatchError {
        DispatchError::Kafka("broker unavailable".to_string())
    }

    #[tokio::test]
    async fn test_settle_ack_commits_next_offset() {
        let mut broker = MockSettlement::new();
        broker.expect_republish().never();
        broker.expect_rewind().never();
        broker
            .expect_commit()
            .withf(|topic, partition, next| topic == "orders" && *partition == 0 && *next == 43)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = settle(&broker, &message(HashMap::new()), Acknowledgement::Ack).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_settle_requeue_republishes_then_commits() {
        let mut seq = mockall::Sequence::new();
        let mut broker = MockSettlement::new();
        broker
            .expect_republish()
            .withf(|msg, headers| {
                msg.offset == 42
                    && headers
                        .iter()
                        .any(|(k, v)| k == REDELIVERY_COUNT_HEADER && v == "3")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        broker
            .expect_commit()
            .withf(|_, _, next| *next == 43)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        broker.expect_rewind().never();

        let headers = HashMap::from([(REDELIVERY_COUNT_HEADER.to_string(), "2".to_string())]);
        let result = settle(&broker, &message(headers), Acknowledgement::Requeue).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_settle_republish_failure_rewinds_without_commit() {
        let mut broker = MockSettlement::new();
        broker
            .expect_republish()
            .times(1)
            .returning(|_, _| Err(kafka_down()));
        broker.expect_commit().never();
        broker
            .expect_rewind()
            .withf(|topic, partition, offset| topic == "orders" && *partition == 0 && *offset == 42)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = settle(&broker, &message(HashMap::new()), Acknowledgement::Requeue).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_settle_rewind_failure_stops_consumption() {
        let mut broker = MockSettlement::new();
        broker
            .expect_republish()
            .times(1)
            .returning(|_, _| Err(kafka_down()));
        broker.expect_commit().never();
        broker
            .expect_rewind()
            .times(1)
            .returning(|_, _, _| Err(kafka_down()));

        let err = settle(&broker, &message(HashMap::new()), Acknowledgement::Requeue)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Kafka(ref m) if m.contains("回退 offset 失败")));
    }

    #[test]
    fn test_message_id() {
        let mut msg = message(HashMap::new());
        assert_eq!(msg.message_id(), "orders-0-42");

        msg.key = Some("order-1".to_string());
        assert_eq!(msg.message_id(), "order-1");
    }
}
