//! 通知分发
//!
//! 异步消费链路和同步 HTTP 接口共用的入口：路由事件、持久化通知，
//! 再交给协调器按渠道投递。

use std::sync::Arc;

use dispatch_shared::observability::metrics;
use tracing::{info, instrument, warn};

use crate::channels::ChannelSenders;
use crate::coordinator::RetryCoordinator;
use crate::error::{NotificationError, Result};
use crate::models::Notification;
use crate::router::{EventRouter, RouteDecision};
use crate::store::NotificationStore;

#[derive(Clone)]
pub struct NotificationDispatcher {
    router: Arc<EventRouter>,
    coordinator: Arc<RetryCoordinator>,
    senders: ChannelSenders,
    store: Arc<dyn NotificationStore>,
}

impl NotificationDispatcher {
    pub fn new(
        router: EventRouter,
        coordinator: RetryCoordinator,
        senders: ChannelSenders,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            router: Arc::new(router),
            coordinator: Arc::new(coordinator),
            senders,
            store,
        }
    }

    pub fn coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    /// 处理一条 topic 消息
    ///
    /// 未识别的事件类型返回 `Ok(())`；解码失败返回毒消息错误。
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    pub async fn handle_event(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let decision = match self.router.route(topic, payload) {
            Ok(decision) => decision,
            Err(e) => {
                let outcome = match e {
                    NotificationError::UnknownTopic(_) => "unknown_topic",
                    _ => "decode_error",
                };
                metrics::record_event(topic, outcome);
                warn!(error = %e, "事件无法解析");
                return Err(e);
            }
        };

        match decision {
            RouteDecision::Notify(notification) => {
                metrics::record_event(topic, "notify");
                self.dispatch(notification).await?;
                Ok(())
            }
            RouteDecision::NoOp { event_type } => {
                metrics::record_event(topic, "noop");
                info!(event_type = %event_type, "事件无需通知");
                Ok(())
            }
        }
    }

    /// 持久化并投递一条通知，返回最终状态
    ///
    /// 投递失败时错误携带通知 id，调用方可据此查询状态。
    pub async fn dispatch(&self, mut notification: Notification) -> Result<Notification> {
        self.store.create(&notification).await?;

        let sender = self.senders.for_channel(notification.channel);
        match self.coordinator.deliver(&mut notification, sender.as_ref()).await {
            Ok(()) => Ok(notification),
            Err(source) => Err(NotificationError::Delivery {
                id: notification.id,
                source,
            }),
        }
    }
}
