//! 队列消费者
//!
//! 每个 topic 一个消费任务。handler 的结果经 `disposition_for` 映射为
//! 确认、重新入队或进入死信队列：
//!
//! | 结果 | 重投次数 | 处理 |
//! |---|---|---|
//! | Ok | 任意 | Ack |
//! | 毒消息 | 任意 | DeadLetter |
//! | 瞬时失败 | `< max` 或 `max == 0` | Requeue |
//! | 瞬时失败 | `>= max` | DeadLetter |
//!
//! 死信发布失败时退化为重新入队，消息不会被静默丢弃。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::{AppConfig, KafkaConfig};
use dispatch_shared::dlq::DlqProducer;
use dispatch_shared::error::DispatchError;
use dispatch_shared::kafka::{
    Acknowledgement, ConsumerMessage, KafkaConsumer, KafkaProducer, TopicAdmin, topics,
};
use dispatch_shared::observability::metrics;
use dispatch_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{NotificationError, Result};

/// 单条消息的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter { reason: String },
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// 根据处理结果和已重投次数决定消息去向
///
/// `max_redeliveries == 0` 表示无限重新入队。
pub fn disposition_for(
    result: &std::result::Result<(), NotificationError>,
    redelivery_count: u32,
    max_redeliveries: u32,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(e) if e.is_poison() => Disposition::DeadLetter {
            reason: e.to_string(),
        },
        Err(e) => {
            if max_redeliveries == 0 || redelivery_count < max_redeliveries {
                Disposition::Requeue
            } else {
                Disposition::DeadLetter {
                    reason: format!("超过最大重投次数 {max_redeliveries}: {e}"),
                }
            }
        }
    }
}

fn publish_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        multiplier: 2.0,
    }
}

// ---------------------------------------------------------------------------
// 死信与结算
// ---------------------------------------------------------------------------

/// 死信发布
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn dead_letter(
        &self,
        msg: &ConsumerMessage,
        reason: &str,
    ) -> std::result::Result<(), DispatchError>;
}

#[async_trait]
impl DeadLetterPublisher for DlqProducer {
    async fn dead_letter(
        &self,
        msg: &ConsumerMessage,
        reason: &str,
    ) -> std::result::Result<(), DispatchError> {
        self.send_to_dlq(msg, reason).await
    }
}

/// 将 handler 结果转换为对消息的确认方式
#[derive(Clone)]
pub struct MessageSettler {
    dead_letters: Arc<dyn DeadLetterPublisher>,
    max_redeliveries: u32,
}

impl MessageSettler {
    pub fn new(dead_letters: Arc<dyn DeadLetterPublisher>, max_redeliveries: u32) -> Self {
        Self {
            dead_letters,
            max_redeliveries,
        }
    }

    /// 死信发布失败时退化为重新入队
    pub async fn settle(
        &self,
        msg: &ConsumerMessage,
        result: &std::result::Result<(), NotificationError>,
    ) -> Acknowledgement {
        let redelivery_count = msg.redelivery_count();
        let disposition = disposition_for(result, redelivery_count, self.max_redeliveries);
        metrics::record_queue_message(&msg.topic, disposition.as_str());

        match disposition {
            Disposition::Ack => Acknowledgement::Ack,
            Disposition::Requeue => {
                if let Err(e) = result {
                    warn!(
                        topic = %msg.topic,
                        offset = msg.offset,
                        redelivery_count,
                        error = %e,
                        "消息处理失败，重新入队"
                    );
                }
                Acknowledgement::Requeue
            }
            Disposition::DeadLetter { reason } => {
                match self.dead_letters.dead_letter(msg, &reason).await {
                    Ok(()) => Acknowledgement::Ack,
                    Err(e) => {
                        error!(
                            topic = %msg.topic,
                            offset = msg.offset,
                            error = %e,
                            "死信发布失败，改为重新入队"
                        );
                        Acknowledgement::Requeue
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConsumer
// ---------------------------------------------------------------------------

/// 基于 Kafka 的队列消费者
#[derive(Clone)]
pub struct QueueConsumer {
    kafka: KafkaConfig,
    producer: KafkaProducer,
    admin: TopicAdmin,
    settler: MessageSettler,
}

impl QueueConsumer {
    pub fn new(config: &AppConfig) -> std::result::Result<Self, DispatchError> {
        let producer = KafkaProducer::new(&config.kafka)?;
        let admin = TopicAdmin::new(&config.kafka)?;
        let dlq = DlqProducer::new(producer.clone(), &config.service_name);

        Ok(Self {
            kafka: config.kafka.clone(),
            producer,
            admin,
            settler: MessageSettler::new(Arc::new(dlq), config.dispatch.max_redeliveries),
        })
    }

    /// 声明 topic 并持续消费，直到关闭信号到达
    ///
    /// 每个 topic 使用独立的消费组，彼此互不阻塞。
    pub async fn subscribe<F, Fut>(
        &self,
        topic: &str,
        shutdown: watch::Receiver<bool>,
        on_message: F,
    ) -> Result<()>
    where
        F: Fn(Vec<u8>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.declare(topic).await?;
        self.declare(topics::DEAD_LETTER_QUEUE).await?;

        let consumer = KafkaConsumer::new(&self.kafka, Some(topic)).map_err(queue_error)?;
        consumer.subscribe(&[topic]).map_err(queue_error)?;
        info!(
            topic,
            max_redeliveries = self.settler.max_redeliveries,
            "开始消费 topic"
        );

        let on_message = &on_message;
        consumer
            .start(shutdown, self.producer.clone(), |msg| async move {
                let result = on_message(msg.payload.clone()).await;
                self.settler.settle(&msg, &result).await
            })
            .await;

        info!(topic, "topic 消费已停止");
        Ok(())
    }

    /// 声明 topic 后持久化发布
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.declare(topic).await?;
        retry_with_policy(
            &publish_policy(),
            "publish",
            DispatchError::is_retryable,
            || self.producer.send(topic, None, payload),
        )
        .await
        .map_err(queue_error)?;
        Ok(())
    }

    async fn declare(&self, topic: &str) -> Result<()> {
        self.admin.declare(topic).await.map_err(queue_error)
    }
}

fn queue_error(e: DispatchError) -> NotificationError {
    NotificationError::Queue(e.to_string())
}
