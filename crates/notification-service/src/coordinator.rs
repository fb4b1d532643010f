//! 重试协调器
//!
//! 对单条通知驱动 `pending -> sent | failed` 状态机。退避在调用方任务上
//! 阻塞执行，期间该 topic 的消费任务不处理其他消息。
//!
//! 状态持久化是尽力而为：存储失败只记录日志，不中断投递尝试序列。

use std::sync::Arc;

use chrono::Utc;
use dispatch_shared::observability::metrics;
use dispatch_shared::retry::RetryPolicy;
use tracing::{error, info, instrument, warn};

use crate::channels::{ChannelSender, SendError};
use crate::models::{Notification, NotificationStatus};
use crate::store::NotificationStore;

/// 默认最大尝试次数（含首次）
pub const MAX_RETRIES: u32 = 3;

/// 默认基础退避
pub const BASE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub struct RetryCoordinator {
    store: Arc<dyn NotificationStore>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy {
                max_attempts: MAX_RETRIES,
                initial_delay: BASE_RETRY_DELAY,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 投递一条已持久化的通知
    ///
    /// 返回时 `notification` 的状态为 sent 或 failed，retry_count 等于失败次数。
    /// 全部尝试失败时返回最后一次的错误。
    #[instrument(
        skip(self, notification, sender),
        fields(notification_id = %notification.id, channel = %notification.channel)
    )]
    pub async fn deliver(
        &self,
        notification: &mut Notification,
        sender: &dyn ChannelSender,
    ) -> Result<(), SendError> {
        let channel = notification.channel.as_str();
        let mut attempt: u32 = 0;

        loop {
            let delay = self.policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match sender.send(notification).await {
                Ok(()) => {
                    metrics::record_delivery_attempt(channel, true);
                    self.persist_status(notification, NotificationStatus::Sent, None)
                        .await;
                    metrics::record_dispatch(channel, NotificationStatus::Sent.as_str());
                    info!(attempt, "通知发送成功");
                    return Ok(());
                }
                Err(e) => {
                    metrics::record_delivery_attempt(channel, false);
                    warn!(attempt, error = %e, "通知发送失败");

                    notification.retry_count += 1;
                    if let Err(store_err) = self.store.increment_retry_count(notification.id).await {
                        error!(error = %store_err, "更新重试次数失败");
                    }

                    attempt += 1;
                    if !self.policy.should_attempt(attempt) {
                        let message = e.to_string();
                        self.persist_status(
                            notification,
                            NotificationStatus::Failed,
                            Some(message),
                        )
                        .await;
                        metrics::record_dispatch(channel, NotificationStatus::Failed.as_str());
                        error!(
                            attempts = attempt,
                            error = %e,
                            "通知发送失败，已用尽重试次数"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }

    /// 外部补偿任务判断是否可再次投递
    ///
    /// 阈值固定为 `MAX_RETRIES`，与本实例配置的尝试次数无关。
    pub fn is_retryable(&self, notification: &Notification) -> bool {
        notification.status == NotificationStatus::Failed && notification.retry_count < MAX_RETRIES
    }

    async fn persist_status(
        &self,
        notification: &mut Notification,
        status: NotificationStatus,
        error_msg: Option<String>,
    ) {
        notification.apply_status(status, error_msg.as_deref(), Utc::now());
        if let Err(e) = self
            .store
            .update_status(notification.id, status, error_msg)
            .await
        {
            error!(status = %status, error = %e, "持久化通知状态失败");
        }
    }
}
