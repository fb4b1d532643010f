//! 通知服务错误类型
//!
//! 区分两类失败：永远无法成功的毒消息（解码失败、未知 topic），
//! 以及投递或存储等瞬时失败。消费者据此决定进入死信队列还是重新入队。

use dispatch_shared::error::DispatchError;
use thiserror::Error;
use uuid::Uuid;

use crate::channels::SendError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("事件解码失败: topic={topic}, 原因={source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("未知的 topic: {0}")]
    UnknownTopic(String),

    #[error("通知投递失败: id={id}, 原因={source}")]
    Delivery {
        id: Uuid,
        #[source]
        source: SendError,
    },

    #[error("通知存储失败: {0}")]
    Store(#[from] DispatchError),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("消息队列错误: {0}")]
    Queue(String),
}

impl NotificationError {
    /// 重投也不可能成功的消息
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::UnknownTopic(_))
    }
}

pub type Result<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_error() -> NotificationError {
        let source = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        NotificationError::Decode {
            topic: "orders".to_string(),
            source,
        }
    }

    #[test]
    fn test_is_poison() {
        assert!(decode_error().is_poison());
        assert!(NotificationError::UnknownTopic("payments".to_string()).is_poison());

        let delivery = NotificationError::Delivery {
            id: Uuid::nil(),
            source: SendError::Connection("refused".to_string()),
        };
        assert!(!delivery.is_poison());
        assert!(!NotificationError::Store(DispatchError::Internal("x".to_string())).is_poison());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            NotificationError::UnknownTopic("payments".to_string()).to_string(),
            "未知的 topic: payments"
        );
        assert!(decode_error().to_string().starts_with("事件解码失败: topic=orders"));
    }
}
