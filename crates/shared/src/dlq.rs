//! 死信队列
//!
//! 无法处理的消息（格式错误、未知 topic，或重新入队次数耗尽）会被包装为
//! `DeadLetterMessage` 发送到死信队列，等待人工排查，而不是无限重试或被丢弃。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DispatchError;
use crate::kafka::{ConsumerMessage, FIRST_FAILED_AT_HEADER, KafkaProducer, topics};

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因与重新入队次数等元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息标识（key 或 topic-partition-offset）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容，非 UTF-8 字节按替换字符保存
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 进入死信队列前已重新入队的次数
    pub redelivery_count: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 从消费到的消息构造死信信封
    ///
    /// 首次失败时间取自重新入队时写入的消息头，缺失时视为本次失败。
    pub fn from_message(
        msg: &ConsumerMessage,
        error: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let first_failed_at = msg
            .headers
            .get(FIRST_FAILED_AT_HEADER)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        Self {
            message_id: msg.message_id(),
            source_topic: msg.topic.clone(),
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
            error: error.into(),
            redelivery_count: msg.redelivery_count(),
            first_failed_at,
            last_failed_at: now,
            source_service: source_service.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(&self, msg: &ConsumerMessage, error: &str) -> Result<(), DispatchError> {
        let dlq_msg = DeadLetterMessage::from_message(msg, error, &self.source_service);

        self.producer
            .send_json(
                topics::DEAD_LETTER_QUEUE,
                Some(&dlq_msg.message_id),
                &dlq_msg,
            )
            .await?;

        warn!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            redelivery_count = dlq_msg.redelivery_count,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
